//! YUV4MPEG2 summary writer.
//!
//! Always emits 4:4:4 so retained frames keep their full colour resolution.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use super::{StreamSpec, VideoSink};
use crate::frame::Frame;
use crate::y4m::{rate_to_ratio, rgb_to_planes_444, Colorspace, Y4mHeader, FRAME_MAGIC};

#[derive(Default)]
pub struct Y4mSink {
    out: Option<BufWriter<File>>,
    spec: Option<StreamSpec>,
    frames: u64,
}

impl Y4mSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VideoSink for Y4mSink {
    fn extension(&self) -> &'static str {
        "y4m"
    }

    fn open(&mut self, path: &Path, spec: StreamSpec) -> Result<()> {
        if self.out.is_some() {
            return Err(anyhow!("y4m sink is already open"));
        }
        let (num, den) = rate_to_ratio(spec.frame_rate);
        let header = Y4mHeader {
            width: spec.width,
            height: spec.height,
            frame_rate_num: num,
            frame_rate_den: den,
            colorspace: Colorspace::C444,
        };
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        out.write_all(header.render().as_bytes())
            .context("failed to write y4m header")?;
        self.out = Some(out);
        self.spec = Some(spec);
        self.frames = 0;
        Ok(())
    }

    fn append(&mut self, frame: &Frame) -> Result<()> {
        let (out, spec) = match (self.out.as_mut(), self.spec.as_ref()) {
            (Some(out), Some(spec)) => (out, spec),
            _ => return Err(anyhow!("y4m sink is not open")),
        };
        if frame.dimensions() != (spec.width, spec.height) {
            return Err(anyhow!(
                "frame {} does not match the {}x{} stream",
                frame.index(),
                spec.width,
                spec.height
            ));
        }
        out.write_all(FRAME_MAGIC.as_bytes())?;
        out.write_all(b"\n")?;
        out.write_all(&rgb_to_planes_444(frame.pixels()))
            .with_context(|| format!("failed to write frame {}", frame.index()))?;
        self.frames += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        let mut out = self
            .out
            .take()
            .ok_or_else(|| anyhow!("y4m sink is not open"))?;
        out.flush().context("failed to flush y4m output")?;
        out.get_ref()
            .sync_all()
            .context("failed to sync y4m output")?;
        log::debug!("Y4mSink: finalized {} frames", self.frames);
        Ok(())
    }

    fn abort(&mut self) {
        self.out.take();
        self.spec.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{FrameSource, Y4mSource};

    #[test]
    fn written_file_reads_back_with_same_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.y4m");
        let spec = StreamSpec {
            frame_rate: 12.5,
            width: 3,
            height: 2,
        };

        let mut sink = Y4mSink::new();
        sink.open(&path, spec).unwrap();
        sink.append(&Frame::filled(7, 3, 2, [255, 255, 255]).unwrap()).unwrap();
        sink.append(&Frame::filled(8, 3, 2, [0, 0, 0]).unwrap()).unwrap();
        sink.finalize().unwrap();

        let mut source = Y4mSource::open(&path).unwrap();
        assert_eq!(source.dimensions(), (3, 2));
        assert!((source.frame_rate() - 12.5).abs() < 1e-9);
        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.index(), 0);
        assert!(first.pixel(2, 1).iter().all(|&c| c >= 250));
        let second = source.next_frame().unwrap().unwrap();
        assert!(second.pixel(0, 0).iter().all(|&c| c <= 5));
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn ntsc_rate_survives_the_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ntsc.y4m");
        let rate = 30000.0 / 1001.0;

        let mut sink = Y4mSink::new();
        sink.open(
            &path,
            StreamSpec {
                frame_rate: rate,
                width: 2,
                height: 2,
            },
        )
        .unwrap();
        sink.append(&Frame::filled(0, 2, 2, [0, 0, 0]).unwrap()).unwrap();
        sink.finalize().unwrap();

        let source = Y4mSource::open(&path).unwrap();
        let header = source.header();
        assert_eq!((header.frame_rate_num, header.frame_rate_den), (30000, 1001));
        assert_eq!(source.frame_rate(), rate);
    }

    #[test]
    fn append_before_open_fails() {
        let mut sink = Y4mSink::new();
        assert!(sink.append(&Frame::filled(0, 1, 1, [0, 0, 0]).unwrap()).is_err());
        assert!(sink.finalize().is_err());
    }

    #[test]
    fn rejects_mismatched_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = Y4mSink::new();
        sink.open(
            &dir.path().join("x.y4m"),
            StreamSpec {
                frame_rate: 25.0,
                width: 2,
                height: 2,
            },
        )
        .unwrap();
        assert!(sink.append(&Frame::filled(0, 4, 4, [0, 0, 0]).unwrap()).is_err());
    }
}
