//! Fixed pool of summary threads.
//!
//! Each job runs a complete pipeline on one thread with its own recorder and
//! segment buffer. The classifier is the only shared state; it is locked per
//! inference call, so jobs interleave at frame granularity.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};

use crate::config::SummaryConfig;
use crate::detect::SharedClassifier;
use crate::error::SummaryResult;
use crate::pipeline::{summarize_file, RunSummary};

/// A video to summarize.
#[derive(Clone, Debug)]
pub struct Job {
    pub input: String,
}

impl Job {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

pub type JobResult = SummaryResult<RunSummary>;

struct Envelope {
    job: Job,
    reply: Sender<JobResult>,
}

pub struct WorkerPool {
    sender: Option<Sender<Envelope>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(size: usize, config: SummaryConfig, classifier: SharedClassifier) -> Result<Self> {
        if size == 0 {
            return Err(anyhow!("worker pool needs at least one thread"));
        }
        let (sender, receiver) = channel::<Envelope>();
        let receiver = Arc::new(Mutex::new(receiver));
        let config = Arc::new(config);

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let receiver = Arc::clone(&receiver);
            let config = Arc::clone(&config);
            let classifier = Arc::clone(&classifier);
            let handle = std::thread::Builder::new()
                .name(format!("summary-worker-{}", id))
                .spawn(move || worker_loop(id, &receiver, &config, &classifier))
                .map_err(|e| anyhow!("failed to spawn summary worker {}: {}", id, e))?;
            workers.push(handle);
        }
        log::info!("worker pool started with {} threads", size);

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job. The result arrives on the returned channel.
    pub fn submit(&self, job: Job) -> Result<Receiver<JobResult>> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("worker pool is shut down"))?;
        let (reply, result) = channel();
        sender
            .send(Envelope { job, reply })
            .map_err(|_| anyhow!("worker pool is shut down"))?;
        Ok(result)
    }

    /// Submit and wait.
    pub fn run(&self, job: Job) -> Result<JobResult> {
        self.submit(job)?
            .recv()
            .map_err(|_| anyhow!("summary worker exited before replying"))
    }

    /// Stop accepting jobs, let queued jobs finish, and join every thread.
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("summary worker panicked");
            }
        }
        log::info!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    id: usize,
    receiver: &Mutex<Receiver<Envelope>>,
    config: &SummaryConfig,
    classifier: &SharedClassifier,
) {
    loop {
        // Hold the lock only while waiting for the next job.
        let next = match receiver.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => break,
        };
        let Ok(Envelope { job, reply }) = next else {
            break;
        };
        log::debug!("worker {}: processing {}", id, job.input);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            summarize_file(config, Arc::clone(classifier), &job.input)
        }));
        // A panicking job drops its reply channel; the caller sees the worker
        // go away and the thread keeps serving the queue.
        let Ok(result) = outcome else {
            log::error!("worker {}: {} panicked", id, job.input);
            continue;
        };
        if let Err(err) = &result {
            log::warn!("worker {}: {} failed: {}", id, job.input, err);
        }
        if reply.send(result).is_err() {
            log::debug!("worker {}: caller went away before the result", id);
        }
    }
}
