//! Error kinds surfaced by a summary run.
//!
//! Every kind is fatal for the video being processed. There is no partial
//! output and no skip-and-continue: the motion gate and the recorder both
//! depend on unbroken sequential evaluation.

use thiserror::Error;

pub type SummaryResult<T> = std::result::Result<T, SummaryError>;

#[derive(Debug, Error)]
pub enum SummaryError {
    /// The input could not be opened or probed. Nothing was written.
    #[error("cannot open video source '{path}': {reason}")]
    SourceUnopenable { path: String, reason: String },

    /// The source opened but produced no frames at all.
    #[error("video source produced no frames")]
    EmptyStream,

    /// A frame could not be decoded after the stream started.
    #[error("failed to decode frame {index}: {reason}")]
    DecodeFailure { index: u64, reason: String },

    /// The classifier collaborator failed on a frame.
    #[error("classifier '{backend}' failed on frame {index}: {reason}")]
    ClassifierFailure {
        backend: String,
        index: u64,
        reason: String,
    },

    /// The output container could not be opened, written, or flushed.
    #[error("summary writer failed: {0}")]
    WriterFailure(String),

    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

impl SummaryError {
    pub fn source_unopenable(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::SourceUnopenable {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    pub fn writer(err: impl std::fmt::Display) -> Self {
        Self::WriterFailure(err.to_string())
    }

    /// Short machine-readable kind, used in API error payloads and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnopenable { .. } => "source_unopenable",
            Self::EmptyStream => "empty_stream",
            Self::DecodeFailure { .. } => "decode_failure",
            Self::ClassifierFailure { .. } => "classifier_failure",
            Self::WriterFailure(_) => "writer_failure",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = SummaryError::source_unopenable("clip.y4m", "missing header");
        assert_eq!(
            err.to_string(),
            "cannot open video source 'clip.y4m': missing header"
        );
        assert_eq!(err.kind(), "source_unopenable");

        let err = SummaryError::ClassifierFailure {
            backend: "tract".to_string(),
            index: 7,
            reason: "timeout".to_string(),
        };
        assert!(err.to_string().contains("frame 7"));
        assert_eq!(err.kind(), "classifier_failure");
    }
}
