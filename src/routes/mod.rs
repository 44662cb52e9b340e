pub mod analysis;
pub mod health;
pub mod metrics;
pub mod queue;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use self::metrics::MetricsState;

/// Room for multipart framing and the text fields around the file.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// HTTP surface of the service. `/metrics` is mounted only when a Prometheus
/// recorder is installed.
pub fn build_router(state: AppState, prometheus: Option<MetricsState>) -> Router {
    let body_limit = state.settings.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    let mut app = Router::new()
        .route("/", get(health::service_info))
        .route("/health", get(health::health_check))
        .route(
            "/api/v1/analyses",
            get(analysis::list_analyses).post(analysis::submit_analysis),
        )
        .route(
            "/api/v1/analyses/{id}",
            get(analysis::get_analysis_status).delete(analysis::delete_analysis),
        )
        .route(
            "/api/v1/analyses/{id}/result",
            get(analysis::get_analysis_result),
        )
        .route("/api/v1/analyses/{id}/report", get(analysis::download_report))
        .route("/api/v1/queue/status", get(queue::queue_status))
        .with_state(state);

    if let Some(metrics_state) = prometheus {
        app = app.route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(metrics_state),
        );
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
}
