//! summary_api - HTTP front end for motion summaries
//!
//! This daemon:
//! 1. Loads the configured classifier once
//! 2. Starts the summary worker pool
//! 3. Serves upload, process and download endpoints until Ctrl-C

use anyhow::Result;
use std::sync::{mpsc, Arc};

use motion_summary::api::{ApiConfig, ApiServer};
use motion_summary::{ClassifierRegistry, SummaryConfig, WorkerPool};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = SummaryConfig::load()?;
    let registry = ClassifierRegistry::from_settings(&config.detection)?;
    registry.warm_up_all()?;
    let classifier = registry.default_classifier()?;

    let pool = Arc::new(WorkerPool::spawn(
        config.api.workers,
        config.clone(),
        classifier,
    )?);
    let api_handle = ApiServer::new(ApiConfig::from_summary_config(&config), Arc::clone(&pool))
        .spawn()?;
    log::info!(
        "summary_api running on {}, writing to {}",
        api_handle.addr,
        config.output_dir.display()
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    log::info!("summary_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;
    // Connection threads may still hold the pool; it shuts down when the last
    // reference goes away.
    drop(pool);

    Ok(())
}
