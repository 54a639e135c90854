use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Object classifier collaborator.
///
/// From the pipeline's point of view every call is independent. Batching,
/// caching and timeouts are the implementation's business; a call that cannot
/// complete must return an error instead of blocking forever.
pub trait Classifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run classification on one frame.
    fn infer(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, called once after loading.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A classifier loaded once and handed to every run.
///
/// Wrapped in `Mutex` because `Classifier::infer` takes `&mut self`. Runs lock
/// it per call, so concurrent videos interleave at frame granularity.
pub type SharedClassifier = Arc<Mutex<dyn Classifier>>;

pub fn share<C: Classifier + 'static>(classifier: C) -> SharedClassifier {
    Arc::new(Mutex::new(classifier))
}
