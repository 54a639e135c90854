//! Local file frame source.
//!
//! `FileSource` picks a decoder from the path:
//! - `stub://...` renders a synthetic scene
//! - `*.y4m` is decoded in pure Rust
//! - anything else goes through FFmpeg (feature: ingest-file-ffmpeg)
//!
//! Remote URLs are rejected; uploads are stored locally before processing.

use std::path::Path;

use anyhow::Result;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::synthetic::SyntheticSource;
use super::y4m::Y4mSource;
use super::FrameSource;
use crate::error::{SummaryError, SummaryResult};
use crate::frame::Frame;

pub struct FileSource {
    path: String,
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    Y4m(Y4mSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    /// Open `path`. Any failure is reported as `SourceUnopenable`.
    pub fn open(path: &str) -> SummaryResult<Self> {
        if !is_local_file_path(path) {
            return Err(SummaryError::source_unopenable(
                path,
                "file ingestion only supports local paths (no URL schemes)",
            ));
        }
        let backend = open_backend(path).map_err(|err| {
            SummaryError::source_unopenable(path, format!("{:#}", err))
        })?;
        Ok(Self {
            path: path.to_string(),
            backend,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn inner(&self) -> &dyn FrameSource {
        match &self.backend {
            FileBackend::Synthetic(source) => source,
            FileBackend::Y4m(source) => source,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn FrameSource {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source,
            FileBackend::Y4m(source) => source,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source,
        }
    }
}

impl FrameSource for FileSource {
    fn frame_rate(&self) -> f64 {
        self.inner().frame_rate()
    }

    fn dimensions(&self) -> (u32, u32) {
        self.inner().dimensions()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.inner_mut().next_frame()
    }

    fn close(&mut self) {
        self.inner_mut().close()
    }
}

fn open_backend(path: &str) -> Result<FileBackend> {
    if path.starts_with("stub://") {
        return Ok(FileBackend::Synthetic(SyntheticSource::from_url(path)?));
    }
    if has_y4m_extension(path) {
        return Ok(FileBackend::Y4m(Y4mSource::open(Path::new(path))?));
    }
    #[cfg(feature = "ingest-file-ffmpeg")]
    {
        Ok(FileBackend::Ffmpeg(FfmpegFileSource::open(path)?))
    }
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    {
        Err(anyhow::anyhow!(
            "only .y4m files are supported without the ingest-file-ffmpeg feature"
        ))
    }
}

fn has_y4m_extension(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("y4m"))
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_remote_urls_and_empty_paths() {
        for path in ["", "   ", "http://camera/video.mp4", "rtsp://cam/1"] {
            match FileSource::open(path) {
                Err(SummaryError::SourceUnopenable { .. }) => {}
                Err(other) => panic!("unexpected error for {path:?}: {other}"),
                Ok(_) => panic!("{path:?} should not open"),
            }
        }
    }

    #[test]
    fn missing_file_is_unopenable() {
        let err = FileSource::open("/definitely/not/here.y4m").err().unwrap();
        assert_eq!(err.kind(), "source_unopenable");
    }

    #[test]
    fn stub_urls_open_synthetic_scene() {
        let mut source = FileSource::open("stub://yard?frames=2&size=16x16&subject=4").unwrap();
        assert_eq!(source.dimensions(), (16, 16));
        assert_eq!(source.frame_rate(), 25.0);
        assert!(source.next_frame().unwrap().is_some());
    }

    #[test]
    fn y4m_extension_is_case_insensitive() {
        assert!(has_y4m_extension("clip.Y4M"));
        assert!(!has_y4m_extension("clip.mp4"));
    }
}
