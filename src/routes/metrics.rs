use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::services::queue::TaskQueue;

#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub queue: Arc<dyn TaskQueue>,
}

/// Registers descriptions for every metric the service and workers emit.
pub fn describe_metrics() {
    metrics::describe_counter!("analysis_jobs_submitted", "Analyses accepted and queued");
    metrics::describe_counter!(
        "analysis_jobs_deduplicated",
        "Submissions answered from a recent identical analysis"
    );
    metrics::describe_counter!("analysis_jobs_completed", "Analyses completed");
    metrics::describe_counter!("analysis_jobs_failed", "Analyses that failed permanently");
    metrics::describe_counter!("analysis_jobs_retried", "Attempts rescheduled after a failure");
    metrics::describe_histogram!(
        "analysis_processing_seconds",
        "Wall-clock time of a successful pipeline attempt"
    );
    metrics::describe_histogram!("analysis_stage_seconds", "Time spent in one pipeline stage");
    metrics::describe_gauge!("analysis_queue_depth", "Tasks waiting in the ready queue");
}

/// GET /metrics: Prometheus text exposition. The queue depth gauge is
/// refreshed on every scrape.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    match state.queue.stats().await {
        Ok(stats) => metrics::gauge!("analysis_queue_depth").set(stats.ready as f64),
        Err(e) => tracing::debug!(error = %e, "Queue stats unavailable during scrape"),
    }
    state.handle.render()
}
