use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use lab_report_analyzer::{
    app_state::build_state,
    config::AppConfig,
    routes::{self, metrics::MetricsState},
};

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
        tracing::error!(error = %e, "lab-report-analyzer failed to start");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;

    tracing::info!("Initializing lab-report-analyzer API server");

    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    routes::metrics::describe_metrics();

    let state = build_state(&config).await?;
    let metrics_state = MetricsState {
        handle: Arc::new(prometheus_handle),
        queue: Arc::clone(&state.queue),
    };

    let app = routes::build_router(state, Some(metrics_state));

    tracing::info!("Starting lab-report-analyzer on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
            }
        })
        .await?;

    Ok(())
}
