use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use lab_report_analyzer::{
    app_state::build_state,
    config::AppConfig,
    services::{retention, worker},
};

/// How often expired task leases are returned to the ready queue.
const RECLAIM_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Analysis worker failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting lab report analysis worker");

    let config = AppConfig::from_env()?;
    let state = build_state(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let concurrency = config.worker_concurrency.max(1);

    let mut handles = Vec::with_capacity(concurrency + 2);
    for worker_id in 0..concurrency {
        handles.push(tokio::spawn(worker::run_worker(
            state.clone(),
            worker_id,
            poll_interval,
            shutdown_rx.clone(),
        )));
    }
    handles.push(tokio::spawn(worker::run_reclaimer(
        state.clone(),
        RECLAIM_INTERVAL,
        shutdown_rx.clone(),
    )));
    handles.push(tokio::spawn(retention::run_retention(
        state,
        Duration::from_secs(config.retention_interval_secs),
        chrono::Duration::days(config.retention_days),
        shutdown_rx,
    )));

    tracing::info!(concurrency, "Worker ready, processing analysis tasks");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, finishing in-flight tasks");
    shutdown_tx.send(true)?;

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task panicked");
        }
    }

    tracing::info!("Worker stopped");
    Ok(())
}
