//! summarize - produce a motion summary of one local video
//!
//! Prints the timeline and the summary path. With `--json` the full run
//! summary is printed instead.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use motion_summary::ui::Ui;
use motion_summary::{summarize_file_with, ClassifierRegistry, SummaryConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Video to summarize: a local file or a `stub://` synthetic scene.
    input: String,
    /// TOML config file (overrides SUMMARY_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory the summary is written to.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Seconds of video to keep recording after the last detection.
    #[arg(long)]
    timeout: Option<f64>,
    /// Classifier backend (`stub` or `tract`).
    #[arg(long)]
    backend: Option<String>,
    /// ONNX model for the tract backend.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Class names file for the tract backend.
    #[arg(long)]
    names: Option<PathBuf>,
    /// Progress display: auto, plain or pretty.
    #[arg(long)]
    ui: Option<String>,
    /// Print the run summary as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Some(path) = &args.config {
        std::env::set_var("SUMMARY_CONFIG", path);
    }
    let mut config = SummaryConfig::load()?;
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(timeout) = args.timeout {
        config.record_timeout = timeout;
    }
    if let Some(backend) = args.backend {
        config.detection.backend = backend;
    }
    if let Some(model) = args.model {
        config.detection.model_path = model;
    }
    if let Some(names) = args.names {
        config.detection.names_path = names;
    }
    config.validate()?;

    let ui = Ui::from_args(
        args.ui.as_deref(),
        std::io::stderr().is_terminal(),
        std::env::var_os("NO_COLOR").is_some(),
    );

    let classifier = {
        let _stage = ui.stage("Loading classifier");
        let registry = ClassifierRegistry::from_settings(&config.detection)?;
        registry.warm_up_all()?;
        registry.default_classifier()?
    };

    let summary = {
        let _stage = ui.stage("Summarizing");
        let mut progress = ui.frame_progress();
        summarize_file_with(&config, classifier, &args.input, &mut progress)
            .map_err(|err| anyhow!("{} ({})", err, err.kind()))?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for line in summary.log_lines() {
        println!("{line}");
    }
    match &summary.output_path {
        Some(path) => println!(
            "summary: {} ({} of {} frames)",
            path.display(),
            summary.frames_retained,
            summary.frames_processed
        ),
        None => println!("summary: nothing relevant detected, no video written"),
    }
    Ok(())
}
