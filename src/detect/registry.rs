use std::collections::HashMap;

use anyhow::{anyhow, Result};

use super::backend::{share, Classifier, SharedClassifier};
use super::backends::StubBackend;
use crate::config::DetectionSettings;

/// Named classifiers loaded at process start.
///
/// Every pipeline run borrows a `SharedClassifier` from here instead of loading
/// its own model.
pub struct ClassifierRegistry {
    backends: HashMap<String, SharedClassifier>,
    default_name: Option<String>,
}

impl ClassifierRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry for the configured backend. The stub is always available;
    /// the ONNX model is only loaded when it is the selected backend.
    pub fn from_settings(settings: &DetectionSettings) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(StubBackend::new());
        match settings.backend.as_str() {
            "stub" => {}
            #[cfg(feature = "backend-tract")]
            "tract" => {
                let backend = super::backends::TractBackend::new(
                    &settings.model_path,
                    &settings.names_path,
                    settings.input_size,
                )?
                .with_min_score(settings.confidence);
                registry.register(backend);
            }
            #[cfg(not(feature = "backend-tract"))]
            "tract" => {
                return Err(anyhow!(
                    "classifier 'tract' requires the backend-tract feature"
                ));
            }
            other => return Err(anyhow!("unknown classifier backend '{}'", other)),
        }
        registry.set_default(&settings.backend)?;
        log::info!(
            "classifier registry: {:?} (default {})",
            registry.list(),
            settings.backend
        );
        Ok(registry)
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<C: Classifier + 'static>(&mut self, classifier: C) {
        let name = classifier.name().to_string();
        self.register_shared(name, share(classifier));
    }

    pub fn register_shared(&mut self, name: impl Into<String>, classifier: SharedClassifier) {
        let name = name.into();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, classifier);
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("classifier '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<SharedClassifier> {
        self.backends.get(name).cloned()
    }

    pub fn default_classifier(&self) -> Result<SharedClassifier> {
        self.default_name
            .as_ref()
            .and_then(|name| self.get(name))
            .ok_or_else(|| anyhow!("no classifier registered"))
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run each backend's warm-up hook once.
    pub fn warm_up_all(&self) -> Result<()> {
        for (name, backend) in &self.backends {
            let mut guard = backend
                .lock()
                .map_err(|_| anyhow!("classifier '{}' lock poisoned", name))?;
            guard.warm_up()?;
        }
        Ok(())
    }
}

impl Default for ClassifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}
