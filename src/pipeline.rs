//! One summary run: decode, gate, record, write.
//!
//! Frames flow strictly forward. The first frame only seeds the motion gate;
//! every later frame is compared with its predecessor, classified when motion
//! fired, and handed to the recorder, which decides whether it is retained.
//! Retained frames are buffered and written once the source is exhausted.

use std::path::{Path, PathBuf};

use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::SummaryConfig;
use crate::detect::{ObjectGate, ObjectLabel, SharedClassifier};
use crate::error::{SummaryError, SummaryResult};
use crate::ingest::{effective_frame_rate, FileSource, FrameSource, PrefetchSource};
use crate::motion::{self, MotionThresholds};
use crate::recorder::Recorder;
use crate::timeline::{EventKind, Timeline, TimelineEvent};
use crate::writer::{default_sink, SegmentWriter, StreamSpec, VideoSink};

/// Per-run settings.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub motion: MotionThresholds,
    pub confidence_threshold: f32,
    pub labels: Vec<ObjectLabel>,
    /// Seconds of video content.
    pub record_timeout: f64,
    pub default_frame_rate: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            motion: MotionThresholds::default(),
            confidence_threshold: 0.5,
            labels: ObjectLabel::ALL.to_vec(),
            record_timeout: 3.0,
            default_frame_rate: 25.0,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> SummaryResult<()> {
        if !self.record_timeout.is_finite() || self.record_timeout < 0.0 {
            return Err(SummaryError::InvalidConfig(format!(
                "record timeout must be a non-negative number of seconds, got {}",
                self.record_timeout
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(SummaryError::InvalidConfig(format!(
                "confidence threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if !self.default_frame_rate.is_finite() || self.default_frame_rate <= 0.0 {
            return Err(SummaryError::InvalidConfig(format!(
                "default frame rate must be positive, got {}",
                self.default_frame_rate
            )));
        }
        if self.labels.is_empty() {
            return Err(SummaryError::InvalidConfig(
                "at least one object label must be allowed".to_string(),
            ));
        }
        Ok(())
    }
}

/// What happened to one evaluated frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameReport {
    pub index: u64,
    pub video_time: f64,
    pub changed_pixels: usize,
    pub motion: bool,
    pub detections: usize,
    pub retained: bool,
}

/// Progress hook for a run. Both callbacks default to doing nothing.
pub trait PipelineObserver {
    fn on_frame(&mut self, _report: &FrameReport) {}

    fn on_event(&mut self, _event: &TimelineEvent) {}
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Result of one run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub events: Vec<TimelineEvent>,
    pub output_path: Option<PathBuf>,
    /// Decoded frames, including the seed frame.
    pub frames_processed: u64,
    pub frames_retained: u64,
    pub retained_indices: Vec<u64>,
    pub classifier_calls: u64,
    pub frame_rate: f64,
    pub resolution: (u32, u32),
    /// SHA-256 over the retained indices and the events, hex encoded.
    pub fingerprint: String,
}

impl RunSummary {
    /// Rendered timeline, one line per event.
    pub fn log_lines(&self) -> Vec<String> {
        self.events.iter().map(ToString::to_string).collect()
    }
}

pub struct SummaryPipeline {
    config: PipelineConfig,
    gate: ObjectGate,
    classifier: SharedClassifier,
}

impl SummaryPipeline {
    pub fn new(config: PipelineConfig, classifier: SharedClassifier) -> SummaryResult<Self> {
        config.validate()?;
        let gate = ObjectGate::new(config.confidence_threshold, config.labels.iter().copied());
        Ok(Self {
            config,
            gate,
            classifier,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process `source` to the end and write retained frames to `output_path`.
    ///
    /// The source is closed on every exit path.
    pub fn run(
        &self,
        source: &mut dyn FrameSource,
        sink: &mut dyn VideoSink,
        output_path: &Path,
        observer: &mut dyn PipelineObserver,
    ) -> SummaryResult<RunSummary> {
        let result = self.run_inner(source, sink, output_path, observer);
        source.close();
        result
    }

    fn run_inner(
        &self,
        source: &mut dyn FrameSource,
        sink: &mut dyn VideoSink,
        output_path: &Path,
        observer: &mut dyn PipelineObserver,
    ) -> SummaryResult<RunSummary> {
        let frame_rate = effective_frame_rate(source.frame_rate(), self.config.default_frame_rate);
        if frame_rate != source.frame_rate() {
            log::warn!(
                "source reported frame rate {}; using {}",
                source.frame_rate(),
                frame_rate
            );
        }

        let seed = source
            .next_frame()
            .map_err(|err| decode_failure(0, err))?
            .ok_or(SummaryError::EmptyStream)?;
        let resolution = seed.dimensions();
        let mut writer = SegmentWriter::new(StreamSpec {
            frame_rate,
            width: resolution.0,
            height: resolution.1,
        })?;
        log::info!(
            "summary run started: {}x{} at {:.3} fps, classifier '{}'",
            resolution.0,
            resolution.1,
            frame_rate,
            self.classifier_name()
        );

        let mut prev_gray = seed.to_gray();
        drop(seed);
        let mut recorder = Recorder::new(self.config.record_timeout);
        let mut timeline = Timeline::new();
        let mut retained_indices = Vec::new();
        let mut frames_processed: u64 = 1;
        let mut classifier_calls: u64 = 0;

        loop {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => return Err(decode_failure(frames_processed, err)),
            };
            frames_processed += 1;

            let gray = frame.to_gray();
            let motion = motion::evaluate(&prev_gray, &gray, self.config.motion)
                .map_err(|err| decode_failure(frame.index(), err))?;
            prev_gray = gray;

            let detections = if motion.is_motion {
                classifier_calls += 1;
                self.gate.classify(&self.classifier, &frame)?
            } else {
                Vec::new()
            };

            let video_time = frame.video_time(frame_rate);
            let decision = recorder.observe(!detections.is_empty(), video_time);
            if let Some(event) = decision.event {
                log::debug!("frame {}: {}", frame.index(), event);
                observer.on_event(&event);
                timeline.push(event);
            }
            observer.on_frame(&FrameReport {
                index: frame.index(),
                video_time,
                changed_pixels: motion.changed_pixels,
                motion: motion.is_motion,
                detections: detections.len(),
                retained: decision.retain,
            });
            if decision.retain {
                retained_indices.push(frame.index());
                writer.retain(frame)?;
            }
        }

        if let Some(event) = recorder.finish() {
            log::debug!("end of stream: {}", event);
            observer.on_event(&event);
            timeline.push(event);
        }

        if !writer.is_empty() {
            log::debug!(
                "flushing {} retained frames ({} bytes)",
                writer.len(),
                writer.buffered_bytes()
            );
        }
        let output_path = writer.finish(sink, output_path)?;
        let events = timeline.into_events();
        let fingerprint = fingerprint(&retained_indices, &events);

        log::info!(
            "summary run finished: {} frames, {} retained, {} classifier calls, {} events",
            frames_processed,
            retained_indices.len(),
            classifier_calls,
            events.len()
        );

        Ok(RunSummary {
            events,
            output_path,
            frames_processed,
            frames_retained: retained_indices.len() as u64,
            retained_indices,
            classifier_calls,
            frame_rate,
            resolution,
            fingerprint,
        })
    }

    fn classifier_name(&self) -> String {
        match self.classifier.lock() {
            Ok(guard) => guard.name().to_string(),
            Err(_) => "unknown".to_string(),
        }
    }
}

fn decode_failure(index: u64, err: anyhow::Error) -> SummaryError {
    SummaryError::DecodeFailure {
        index,
        reason: format!("{:#}", err),
    }
}

fn fingerprint(retained: &[u64], events: &[TimelineEvent]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((retained.len() as u64).to_le_bytes());
    for index in retained {
        hasher.update(index.to_le_bytes());
    }
    for event in events {
        hasher.update(event.video_time.to_bits().to_le_bytes());
        hasher.update([match event.kind {
            EventKind::Started => 1u8,
            EventKind::Stopped => 2u8,
        }]);
    }
    hex::encode(hasher.finalize())
}

/// `<32 hex chars>_summary.<ext>`
pub fn output_file_name(extension: &str) -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}_summary.{}", hex::encode(bytes), extension)
}

/// Summarize a local file into `config.output_dir` with the default sink.
pub fn summarize_file(
    config: &SummaryConfig,
    classifier: SharedClassifier,
    input: &str,
) -> SummaryResult<RunSummary> {
    summarize_file_with(config, classifier, input, &mut NoopObserver)
}

/// Same as [`summarize_file`] with a progress observer.
pub fn summarize_file_with(
    config: &SummaryConfig,
    classifier: SharedClassifier,
    input: &str,
    observer: &mut dyn PipelineObserver,
) -> SummaryResult<RunSummary> {
    let pipeline = SummaryPipeline::new(config.pipeline_config(), classifier)?;

    let mut source: Box<dyn FrameSource> = if config.prefetch_depth > 0 {
        let path = input.to_string();
        Box::new(PrefetchSource::open_with(
            move || FileSource::open(&path),
            config.prefetch_depth,
        )?)
    } else {
        Box::new(FileSource::open(input)?)
    };

    if let Err(err) = std::fs::create_dir_all(&config.output_dir) {
        source.close();
        return Err(SummaryError::writer(format!(
            "cannot create output directory {}: {}",
            config.output_dir.display(),
            err
        )));
    }

    let mut sink = default_sink();
    let output_path = config.output_dir.join(output_file_name(sink.extension()));
    log::info!("summarizing {} into {}", input, output_path.display());
    pipeline.run(source.as_mut(), sink.as_mut(), &output_path, observer)
}
