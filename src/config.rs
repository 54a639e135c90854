use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::detect::ObjectLabel;
use crate::motion::MotionThresholds;
use crate::pipeline::PipelineConfig;

const DEFAULT_OUTPUT_DIR: &str = "./output";
const DEFAULT_MOTION_THRESHOLD: u8 = 25;
const DEFAULT_AREA_THRESHOLD: usize = 5000;
const DEFAULT_RECORD_TIMEOUT_SECS: f64 = 3.0;
const DEFAULT_FRAME_RATE: f64 = 25.0;
const DEFAULT_PREFETCH_DEPTH: usize = 4;
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_MODEL_PATH: &str = "./yolo/yolov8n.onnx";
const DEFAULT_NAMES_PATH: &str = "./yolo/coco.names";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_WORKERS: usize = 2;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 512 * 1024 * 1024;
const UPLOAD_DIR_NAME: &str = "motion-summary-uploads";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SummaryConfigFile {
    output_dir: Option<PathBuf>,
    prefetch_depth: Option<usize>,
    motion: Option<MotionConfigFile>,
    recording: Option<RecordingConfigFile>,
    detection: Option<DetectionConfigFile>,
    api: Option<ApiConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MotionConfigFile {
    pixel_threshold: Option<u8>,
    area_threshold: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RecordingConfigFile {
    timeout_secs: Option<f64>,
    default_frame_rate: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    backend: Option<String>,
    confidence: Option<f32>,
    labels: Option<Vec<String>>,
    model_path: Option<PathBuf>,
    names_path: Option<PathBuf>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ApiConfigFile {
    addr: Option<String>,
    workers: Option<usize>,
    max_upload_bytes: Option<u64>,
    upload_dir: Option<PathBuf>,
}

/// Runtime configuration shared by the CLI and the API server.
#[derive(Debug, Clone)]
pub struct SummaryConfig {
    pub output_dir: PathBuf,
    /// Frames decoded ahead of the pipeline; 0 decodes inline.
    pub prefetch_depth: usize,
    pub motion: MotionThresholds,
    /// Seconds of video after the last detection before a recording stops.
    pub record_timeout: f64,
    /// Used when a source reports no usable frame rate.
    pub default_frame_rate: f64,
    pub detection: DetectionSettings,
    pub api: ApiSettings,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub backend: String,
    pub confidence: f32,
    pub labels: Vec<ObjectLabel>,
    pub model_path: PathBuf,
    pub names_path: PathBuf,
    pub input_size: u32,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub addr: String,
    pub workers: usize,
    pub max_upload_bytes: u64,
    /// Where uploads wait while they are processed. Must not be inside
    /// `output_dir`, which is what `/download-video` serves.
    pub upload_dir: PathBuf,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            prefetch_depth: DEFAULT_PREFETCH_DEPTH,
            motion: MotionThresholds {
                pixel_threshold: DEFAULT_MOTION_THRESHOLD,
                area_threshold: DEFAULT_AREA_THRESHOLD,
            },
            record_timeout: DEFAULT_RECORD_TIMEOUT_SECS,
            default_frame_rate: DEFAULT_FRAME_RATE,
            detection: DetectionSettings {
                backend: DEFAULT_BACKEND.to_string(),
                confidence: DEFAULT_CONFIDENCE,
                labels: ObjectLabel::ALL.to_vec(),
                model_path: PathBuf::from(DEFAULT_MODEL_PATH),
                names_path: PathBuf::from(DEFAULT_NAMES_PATH),
                input_size: DEFAULT_INPUT_SIZE,
            },
            api: ApiSettings {
                addr: DEFAULT_API_ADDR.to_string(),
                workers: DEFAULT_WORKERS,
                max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
                upload_dir: std::env::temp_dir().join(UPLOAD_DIR_NAME),
            },
        }
    }
}

impl SummaryConfig {
    /// Defaults, then the TOML file named by `SUMMARY_CONFIG`, then
    /// `SUMMARY_*` environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SUMMARY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document on top of the defaults, without consulting the
    /// environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: SummaryConfigFile = toml::from_str(raw).context("invalid config document")?;
        let cfg = Self::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SummaryConfigFile) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(dir) = file.output_dir {
            cfg.output_dir = dir;
        }
        if let Some(depth) = file.prefetch_depth {
            cfg.prefetch_depth = depth;
        }
        if let Some(motion) = file.motion {
            if let Some(value) = motion.pixel_threshold {
                cfg.motion.pixel_threshold = value;
            }
            if let Some(value) = motion.area_threshold {
                cfg.motion.area_threshold = value;
            }
        }
        if let Some(recording) = file.recording {
            if let Some(value) = recording.timeout_secs {
                cfg.record_timeout = value;
            }
            if let Some(value) = recording.default_frame_rate {
                cfg.default_frame_rate = value;
            }
        }
        if let Some(detection) = file.detection {
            if let Some(backend) = detection.backend {
                cfg.detection.backend = backend;
            }
            if let Some(value) = detection.confidence {
                cfg.detection.confidence = value;
            }
            if let Some(labels) = detection.labels {
                cfg.detection.labels = parse_labels(labels.iter().map(String::as_str))?;
            }
            if let Some(path) = detection.model_path {
                cfg.detection.model_path = path;
            }
            if let Some(path) = detection.names_path {
                cfg.detection.names_path = path;
            }
            if let Some(size) = detection.input_size {
                cfg.detection.input_size = size;
            }
        }
        if let Some(api) = file.api {
            if let Some(addr) = api.addr {
                cfg.api.addr = addr;
            }
            if let Some(workers) = api.workers {
                cfg.api.workers = workers;
            }
            if let Some(limit) = api.max_upload_bytes {
                cfg.api.max_upload_bytes = limit;
            }
            if let Some(dir) = api.upload_dir {
                cfg.api.upload_dir = dir;
            }
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(dir) = env_string("SUMMARY_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(value) = env_parse("SUMMARY_MOTION_THRESHOLD", "an integer in 0..=255")? {
            self.motion.pixel_threshold = value;
        }
        if let Some(value) = env_parse("SUMMARY_AREA_THRESHOLD", "a pixel count")? {
            self.motion.area_threshold = value;
        }
        if let Some(value) = env_parse("SUMMARY_RECORD_TIMEOUT_SECS", "a number of seconds")? {
            self.record_timeout = value;
        }
        if let Some(value) = env_parse("SUMMARY_CONFIDENCE", "a number between 0 and 1")? {
            self.detection.confidence = value;
        }
        if let Some(labels) = env_string("SUMMARY_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.detection.labels = parse_labels(parsed.iter().map(String::as_str))?;
            }
        }
        if let Some(backend) = env_string("SUMMARY_BACKEND") {
            self.detection.backend = backend;
        }
        if let Some(path) = env_string("SUMMARY_MODEL_PATH") {
            self.detection.model_path = PathBuf::from(path);
        }
        if let Some(path) = env_string("SUMMARY_NAMES_PATH") {
            self.detection.names_path = PathBuf::from(path);
        }
        if let Some(addr) = env_string("SUMMARY_API_ADDR") {
            self.api.addr = addr;
        }
        if let Some(value) = env_parse("SUMMARY_WORKERS", "a positive integer")? {
            self.api.workers = value;
        }
        if let Some(dir) = env_string("SUMMARY_UPLOAD_DIR") {
            self.api.upload_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.pipeline_config()
            .validate()
            .map_err(|err| anyhow!("{}", err))?;
        if self.detection.backend.trim().is_empty() {
            return Err(anyhow!("detection backend must not be empty"));
        }
        if self.detection.input_size == 0 {
            return Err(anyhow!("detection input_size must be greater than zero"));
        }
        if self.api.workers == 0 {
            return Err(anyhow!("api workers must be at least 1"));
        }
        if self.api.max_upload_bytes == 0 {
            return Err(anyhow!("api max_upload_bytes must be greater than zero"));
        }
        if self.api.upload_dir.starts_with(&self.output_dir) {
            return Err(anyhow!(
                "api upload_dir {} must not be inside output_dir {}",
                self.api.upload_dir.display(),
                self.output_dir.display()
            ));
        }
        Ok(())
    }

    /// Per-run settings handed to `SummaryPipeline`.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            motion: self.motion,
            confidence_threshold: self.detection.confidence,
            labels: self.detection.labels.clone(),
            record_timeout: self.record_timeout,
            default_frame_rate: self.default_frame_rate,
        }
    }
}

fn read_config_file(path: &Path) -> Result<SummaryConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(key: &str, expected: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be {} (got '{}')", key, expected, raw)),
        None => Ok(None),
    }
}

fn parse_labels<'a>(names: impl Iterator<Item = &'a str>) -> Result<Vec<ObjectLabel>> {
    let mut labels = Vec::new();
    for name in names {
        let label = ObjectLabel::from_str(name)?;
        if !labels.contains(&label) {
            labels.push(label);
        }
    }
    Ok(labels)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
