use std::collections::BTreeSet;

use crate::detect::backend::SharedClassifier;
use crate::detect::result::{Detection, ObjectLabel};
use crate::error::{SummaryError, SummaryResult};
use crate::frame::Frame;

/// Filters classifier output down to allow-listed labels above a confidence floor.
#[derive(Clone, Debug)]
pub struct ObjectGate {
    confidence_threshold: f32,
    allowlist: BTreeSet<ObjectLabel>,
}

impl ObjectGate {
    pub fn new(confidence_threshold: f32, allowlist: impl IntoIterator<Item = ObjectLabel>) -> Self {
        Self {
            confidence_threshold,
            allowlist: allowlist.into_iter().collect(),
        }
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn allows(&self, label: ObjectLabel) -> bool {
        self.allowlist.contains(&label)
    }

    /// Classify `frame` and keep only relevant detections.
    ///
    /// Callers only invoke this for frames where the motion gate fired.
    pub fn classify(
        &self,
        classifier: &SharedClassifier,
        frame: &Frame,
    ) -> SummaryResult<Vec<Detection>> {
        let (backend, raw) = {
            let mut guard = classifier
                .lock()
                .map_err(|_| SummaryError::ClassifierFailure {
                    backend: "unknown".to_string(),
                    index: frame.index(),
                    reason: "classifier lock poisoned".to_string(),
                })?;
            let backend = guard.name();
            let raw = guard
                .infer(frame)
                .map_err(|err| SummaryError::ClassifierFailure {
                    backend: backend.to_string(),
                    index: frame.index(),
                    reason: format!("{:#}", err),
                })?;
            (backend, raw)
        };

        let detections: Vec<Detection> = raw
            .into_iter()
            .filter(|det| det.confidence >= self.confidence_threshold)
            .filter_map(|det| {
                let label = det.label.parse::<ObjectLabel>().ok()?;
                self.allows(label).then_some(Detection {
                    label,
                    confidence: det.confidence,
                    bbox: det.bbox,
                })
            })
            .collect();

        log::trace!(
            "{}: frame {} -> {} relevant detections",
            backend,
            frame.index(),
            detections.len()
        );
        Ok(detections)
    }
}

impl Default for ObjectGate {
    fn default() -> Self {
        Self::new(0.5, ObjectLabel::ALL)
    }
}
