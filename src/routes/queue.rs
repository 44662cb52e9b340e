use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::models::analysis::QueueStatusView;
use crate::services::analysis::AnalysisError;

/// GET /api/v1/queue/status: ready, in-flight and delayed task counts.
pub async fn queue_status(
    State(state): State<AppState>,
) -> Result<Json<QueueStatusView>, AnalysisError> {
    Ok(Json(state.analyses().queue_status().await?))
}
