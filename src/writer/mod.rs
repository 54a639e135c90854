//! Summary video output.
//!
//! Retained frames are buffered for the whole pass and written once, after
//! the source is exhausted. The output container is opened exactly once, so
//! a summary is always a single file; a run that retains nothing writes no
//! file at all.

#[cfg(feature = "encode-ffmpeg")]
mod ffmpeg;
mod memory;
mod y4m;

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::error::{SummaryError, SummaryResult};
use crate::frame::Frame;

#[cfg(feature = "encode-ffmpeg")]
pub use self::ffmpeg::FfmpegSink;
pub use memory::MemorySink;
pub use y4m::Y4mSink;

/// Geometry and timing the output must reproduce exactly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamSpec {
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
}

impl StreamSpec {
    pub fn validate(&self) -> Result<(), SummaryError> {
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(SummaryError::writer(format!(
                "output frame rate {} is not a positive number",
                self.frame_rate
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(SummaryError::writer(format!(
                "output size {}x{} is empty",
                self.width, self.height
            )));
        }
        Ok(())
    }

    fn check_frame(&self, frame: &Frame) -> Result<(), SummaryError> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(SummaryError::writer(format!(
                "frame {} is {}x{} but the output is {}x{}",
                frame.index(),
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        Ok(())
    }
}

/// Output container collaborator.
pub trait VideoSink {
    /// File extension of the produced container, without the dot.
    fn extension(&self) -> &'static str;

    fn open(&mut self, path: &Path, spec: StreamSpec) -> Result<()>;

    fn append(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close the container.
    fn finalize(&mut self) -> Result<()>;

    /// Drop an open container without finalizing it.
    fn abort(&mut self) {}
}

impl<S: VideoSink + ?Sized> VideoSink for Box<S> {
    fn extension(&self) -> &'static str {
        (**self).extension()
    }

    fn open(&mut self, path: &Path, spec: StreamSpec) -> Result<()> {
        (**self).open(path, spec)
    }

    fn append(&mut self, frame: &Frame) -> Result<()> {
        (**self).append(frame)
    }

    fn finalize(&mut self) -> Result<()> {
        (**self).finalize()
    }

    fn abort(&mut self) {
        (**self).abort()
    }
}

/// Sink used for summary files: MP4 when FFmpeg encoding is compiled in,
/// YUV4MPEG2 otherwise.
pub fn default_sink() -> Box<dyn VideoSink> {
    #[cfg(feature = "encode-ffmpeg")]
    {
        Box::new(FfmpegSink::new())
    }
    #[cfg(not(feature = "encode-ffmpeg"))]
    {
        Box::new(Y4mSink::new())
    }
}

/// Segment buffer for one run.
pub struct SegmentWriter {
    spec: StreamSpec,
    frames: Vec<Frame>,
}

impl SegmentWriter {
    pub fn new(spec: StreamSpec) -> SummaryResult<Self> {
        spec.validate()?;
        Ok(Self {
            spec,
            frames: Vec::new(),
        })
    }

    pub fn spec(&self) -> StreamSpec {
        self.spec
    }

    /// Queue a retained frame. Frames whose geometry differs from the source
    /// are rejected instead of being written into a mismatched container.
    pub fn retain(&mut self, frame: Frame) -> SummaryResult<()> {
        self.spec.check_frame(&frame)?;
        self.frames.push(frame);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Approximate bytes held by the buffer.
    pub fn buffered_bytes(&self) -> usize {
        self.frames.iter().map(|f| f.pixels().len()).sum()
    }

    /// Write every buffered frame to `path` through `sink`.
    ///
    /// Returns `None` without touching the filesystem when nothing was
    /// retained. On failure the partial file is removed.
    pub fn finish(self, sink: &mut dyn VideoSink, path: &Path) -> SummaryResult<Option<PathBuf>> {
        if self.frames.is_empty() {
            return Ok(None);
        }

        let written = self.frames.len();
        let result = (|| -> Result<()> {
            sink.open(path, self.spec)?;
            for frame in &self.frames {
                sink.append(frame)?;
            }
            sink.finalize()
        })();

        match result {
            Ok(()) => {
                log::info!("wrote {} frames to {}", written, path.display());
                Ok(Some(path.to_path_buf()))
            }
            Err(err) => {
                sink.abort();
                if path.exists() {
                    if let Err(rm_err) = std::fs::remove_file(path) {
                        log::warn!("failed to remove partial output {}: {}", path.display(), rm_err);
                    }
                }
                Err(SummaryError::writer(format!("{}: {:#}", path.display(), err)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn spec() -> StreamSpec {
        StreamSpec {
            frame_rate: 10.0,
            width: 4,
            height: 2,
        }
    }

    struct FailingSink {
        fail_after: usize,
        appended: usize,
        aborted: bool,
    }

    impl VideoSink for FailingSink {
        fn extension(&self) -> &'static str {
            "bin"
        }

        fn open(&mut self, path: &Path, _spec: StreamSpec) -> Result<()> {
            std::fs::write(path, b"partial")?;
            Ok(())
        }

        fn append(&mut self, _frame: &Frame) -> Result<()> {
            if self.appended == self.fail_after {
                return Err(anyhow!("disk full"));
            }
            self.appended += 1;
            Ok(())
        }

        fn finalize(&mut self) -> Result<()> {
            Ok(())
        }

        fn abort(&mut self) {
            self.aborted = true;
        }
    }

    #[test]
    fn rejects_invalid_specs() {
        for bad in [
            StreamSpec { frame_rate: 0.0, ..spec() },
            StreamSpec { frame_rate: f64::NAN, ..spec() },
            StreamSpec { width: 0, ..spec() },
        ] {
            assert!(matches!(
                SegmentWriter::new(bad),
                Err(SummaryError::WriterFailure(_))
            ));
        }
    }

    #[test]
    fn rejects_frames_with_other_geometry() {
        let mut writer = SegmentWriter::new(spec()).unwrap();
        writer.retain(Frame::filled(1, 4, 2, [0, 0, 0]).unwrap()).unwrap();
        let err = writer.retain(Frame::filled(2, 2, 4, [0, 0, 0]).unwrap()).unwrap_err();
        assert!(err.to_string().contains("frame 2 is 2x4"));
        assert_eq!(writer.len(), 1);
    }

    #[test]
    fn empty_buffer_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.y4m");
        let mut sink = MemorySink::new();
        let result = SegmentWriter::new(spec()).unwrap().finish(&mut sink, &path).unwrap();
        assert!(result.is_none());
        assert!(!sink.is_opened());
        assert!(!path.exists());
    }

    #[test]
    fn flushes_all_frames_in_order() {
        let mut writer = SegmentWriter::new(spec()).unwrap();
        for i in [3, 4, 9] {
            writer.retain(Frame::filled(i, 4, 2, [1, 2, 3]).unwrap()).unwrap();
        }
        let mut sink = MemorySink::new();
        let path = Path::new("memory://summary");
        let out = writer.finish(&mut sink, path).unwrap();
        assert_eq!(out.as_deref(), Some(path));
        assert_eq!(sink.indices(), vec![3, 4, 9]);
        assert_eq!(sink.spec(), Some(spec()));
        assert!(sink.is_finalized());
    }

    #[test]
    fn failed_write_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut writer = SegmentWriter::new(spec()).unwrap();
        for i in 0..3 {
            writer.retain(Frame::filled(i, 4, 2, [0, 0, 0]).unwrap()).unwrap();
        }
        let mut sink = FailingSink {
            fail_after: 1,
            appended: 0,
            aborted: false,
        };
        let err = writer.finish(&mut sink, &path).unwrap_err();
        assert_eq!(err.kind(), "writer_failure");
        assert!(err.to_string().contains("disk full"));
        assert!(sink.aborted);
        assert!(!path.exists());
    }
}
