//! Frame sources.
//!
//! This module provides the sources a summary run can read from:
//! - Synthetic scenes (`stub://`) for tests and demos
//! - YUV4MPEG2 files (`*.y4m`), decoded in pure Rust
//! - Any other local video file (feature: ingest-file-ffmpeg)
//! - `PrefetchSource`, which decodes one stage ahead on its own thread
//!
//! Every source hands out frames strictly in stream order with consecutive
//! indices starting at 0. End of stream is `Ok(None)`; a decode failure is an
//! error and ends the run.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod prefetch;
pub mod synthetic;
pub mod y4m;

use anyhow::Result;

use crate::frame::Frame;

pub use file::FileSource;
pub use prefetch::PrefetchSource;
pub use synthetic::{SceneConfig, SyntheticSource};
pub use y4m::Y4mSource;

/// Ordered, finite sequence of decoded frames with a fixed frame rate.
pub trait FrameSource {
    /// Frame rate as reported by the container. May be 0 or NaN when unknown.
    fn frame_rate(&self) -> f64;

    /// Frame geometry `(width, height)`.
    fn dimensions(&self) -> (u32, u32);

    /// Decode the next frame, `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the decoder. Called on every exit path of a run; must be idempotent.
    fn close(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn frame_rate(&self) -> f64 {
        (**self).frame_rate()
    }

    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Frame rate actually used for video time: the reported rate, or `fallback`
/// when the source reports zero, a negative value, or something non-finite.
pub fn effective_frame_rate(reported: f64, fallback: f64) -> f64 {
    if reported.is_finite() && reported > 0.0 {
        reported
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_on_unknown_rates() {
        assert_eq!(effective_frame_rate(30.0, 25.0), 30.0);
        assert_eq!(effective_frame_rate(0.0, 25.0), 25.0);
        assert_eq!(effective_frame_rate(-1.0, 25.0), 25.0);
        assert_eq!(effective_frame_rate(f64::NAN, 25.0), 25.0);
        assert_eq!(effective_frame_rate(f64::INFINITY, 25.0), 25.0);
    }
}
