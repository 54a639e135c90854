mod backend;
mod backends;
mod gate;
mod registry;
mod result;

pub use backend::{share, Classifier, SharedClassifier};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use gate::ObjectGate;
pub use registry::ClassifierRegistry;
pub use result::{BoundingBox, Detection, ObjectLabel, RawDetection};
