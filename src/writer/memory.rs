//! In-memory sink, used by tests and by callers that post-process frames.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use super::{StreamSpec, VideoSink};
use crate::frame::Frame;

#[derive(Default)]
pub struct MemorySink {
    path: Option<PathBuf>,
    spec: Option<StreamSpec>,
    frames: Vec<Frame>,
    opens: usize,
    finalized: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_opened(&self) -> bool {
        self.opens > 0
    }

    /// Number of times `open` was called.
    pub fn open_count(&self) -> usize {
        self.opens
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn spec(&self) -> Option<StreamSpec> {
        self.spec
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Source indices of the written frames, in write order.
    pub fn indices(&self) -> Vec<u64> {
        self.frames.iter().map(Frame::index).collect()
    }
}

impl VideoSink for MemorySink {
    fn extension(&self) -> &'static str {
        "raw"
    }

    fn open(&mut self, path: &Path, spec: StreamSpec) -> Result<()> {
        self.path = Some(path.to_path_buf());
        self.spec = Some(spec);
        self.frames.clear();
        self.finalized = false;
        self.opens += 1;
        Ok(())
    }

    fn append(&mut self, frame: &Frame) -> Result<()> {
        if self.spec.is_none() || self.finalized {
            return Err(anyhow!("memory sink is not open"));
        }
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if self.spec.is_none() {
            return Err(anyhow!("memory sink is not open"));
        }
        self.finalized = true;
        Ok(())
    }
}
