//! Decode-ahead wrapper.
//!
//! Runs the wrapped source on its own thread and hands frames over a bounded
//! channel. Order is preserved because there is exactly one producer and one
//! consumer; the bound caps how far decoding can run ahead of classification.
//!
//! The source is opened on the producer thread, so decoders that cannot be
//! moved between threads can still be prefetched.

use std::sync::mpsc::{sync_channel, Receiver};
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};

use super::FrameSource;
use crate::error::{SummaryError, SummaryResult};
use crate::frame::Frame;

type Item = Result<Option<Frame>>;

pub struct PrefetchSource {
    frame_rate: f64,
    dimensions: (u32, u32),
    rx: Option<Receiver<Item>>,
    join: Option<JoinHandle<()>>,
    finished: bool,
}

impl PrefetchSource {
    /// Start decoding `source` with at most `depth` frames buffered.
    pub fn spawn<S>(source: S, depth: usize) -> SummaryResult<Self>
    where
        S: FrameSource + Send + 'static,
    {
        Self::open_with(move || Ok(source), depth)
    }

    /// Open a source on the prefetch thread and start decoding it.
    ///
    /// Errors from `open` are returned unchanged.
    pub fn open_with<S, F>(open: F, depth: usize) -> SummaryResult<Self>
    where
        S: FrameSource + 'static,
        F: FnOnce() -> SummaryResult<S> + Send + 'static,
    {
        let (meta_tx, meta_rx) = sync_channel::<SummaryResult<(f64, (u32, u32))>>(1);
        let (tx, rx) = sync_channel::<Item>(depth.max(1));
        let join = std::thread::Builder::new()
            .name("frame-prefetch".to_string())
            .spawn(move || {
                let mut source = match open() {
                    Ok(source) => source,
                    Err(err) => {
                        let _ = meta_tx.send(Err(err));
                        return;
                    }
                };
                if meta_tx
                    .send(Ok((source.frame_rate(), source.dimensions())))
                    .is_err()
                {
                    source.close();
                    return;
                }
                loop {
                    let item = source.next_frame();
                    let last = !matches!(item, Ok(Some(_)));
                    // The consumer hung up; stop decoding.
                    if tx.send(item).is_err() || last {
                        break;
                    }
                }
                source.close();
            })
            .map_err(|err| SummaryError::source_unopenable("prefetch", err))?;

        let meta = meta_rx.recv().unwrap_or_else(|_| {
            Err(SummaryError::source_unopenable(
                "prefetch",
                "prefetch thread exited before opening the source",
            ))
        });
        let (frame_rate, dimensions) = match meta {
            Ok(meta) => meta,
            Err(err) => {
                if join.join().is_err() {
                    log::error!("frame prefetch thread panicked");
                }
                return Err(err);
            }
        };

        Ok(Self {
            frame_rate,
            dimensions,
            rx: Some(rx),
            join: Some(join),
            finished: false,
        })
    }
}

impl FrameSource for PrefetchSource {
    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        let rx = self
            .rx
            .as_ref()
            .ok_or_else(|| anyhow!("prefetch source already closed"))?;
        let item = rx
            .recv()
            .map_err(|_| anyhow!("prefetch thread stopped unexpectedly"))?;
        if !matches!(item, Ok(Some(_))) {
            self.finished = true;
        }
        item
    }

    fn close(&mut self) {
        // Dropping the receiver unblocks a producer waiting on a full channel.
        self.rx.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("frame prefetch thread panicked");
            }
        }
    }
}

impl Drop for PrefetchSource {
    fn drop(&mut self) {
        self.close();
    }
}
