//! Motion Summary
//!
//! Turns a long, mostly static video into a short summary containing only the
//! stretches where a relevant object was present.
//!
//! # Architecture
//!
//! Every frame passes through a fixed chain of stages:
//!
//! 1. **Motion gate** (`motion`): cheap pixel difference against the previous
//!    frame. Frames without motion never reach the classifier.
//! 2. **Object gate** (`detect`): runs the shared classifier and keeps only
//!    allow-listed labels above the confidence floor.
//! 3. **Recorder** (`recorder`): Idle/Recording state machine driven by video
//!    time, so results do not depend on how fast the machine is.
//! 4. **Writer** (`writer`): retained frames are buffered and written once as
//!    a single summary file.
//! 5. **Timeline** (`timeline`): ordered start/stop events.
//!
//! `pipeline` wires the stages together for one video, `worker` runs many
//! videos on a thread pool, and `api` exposes the pool over HTTP.
//!
//! # Module Structure
//!
//! - `frame`: packed RGB frames and their luma projection
//! - `ingest`: frame sources (synthetic, YUV4MPEG2, FFmpeg)
//! - `y4m`: YUV4MPEG2 header and colour conversion shared by reader and writer
//! - `config`: TOML file and environment configuration
//! - `error`: error kinds of a summary run

pub mod api;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod motion;
pub mod pipeline;
pub mod recorder;
pub mod timeline;
pub mod ui;
pub mod worker;
pub mod writer;
pub mod y4m;

pub use config::SummaryConfig;
pub use detect::{
    share, BoundingBox, Classifier, ClassifierRegistry, Detection, ObjectGate, ObjectLabel,
    RawDetection, SharedClassifier, StubBackend,
};
pub use error::{SummaryError, SummaryResult};
pub use frame::{Frame, GrayFrame};
pub use ingest::{FileSource, FrameSource};
pub use motion::{MotionResult, MotionThresholds};
pub use pipeline::{
    summarize_file, summarize_file_with, FrameReport, NoopObserver, PipelineConfig,
    PipelineObserver, RunSummary, SummaryPipeline,
};
pub use recorder::{Recorder, RecordingState};
pub use timeline::{EventKind, Timeline, TimelineEvent};
pub use worker::{Job, WorkerPool};
pub use writer::{MemorySink, SegmentWriter, StreamSpec, VideoSink, Y4mSink};
