use chrono::{Duration, Utc};
use tokio::sync::watch;

use crate::app_state::AppState;
use crate::services::store::StoreError;

/// Delete jobs created more than `retention` ago, together with their staged
/// artifacts and report files. Returns the number of jobs removed.
pub async fn sweep_expired(state: &AppState, retention: Duration) -> Result<usize, StoreError> {
    let cutoff = Utc::now() - retention;
    let expired = state.store.delete_created_before(cutoff).await?;

    for job in &expired {
        if let Err(e) = state.storage.remove(&job.artifact.locator).await {
            tracing::warn!(job_id = %job.id, error = %e, "Could not remove expired artifact");
        }
        if let Err(e) = state.storage.remove_report(job.id).await {
            tracing::warn!(job_id = %job.id, error = %e, "Could not remove expired report");
        }
    }

    if !expired.is_empty() {
        tracing::info!(count = expired.len(), cutoff = %cutoff, "Retention sweep removed old analyses");
    }
    Ok(expired.len())
}

/// Runs `sweep_expired` every `interval` until shutdown.
pub async fn run_retention(
    state: AppState,
    interval: std::time::Duration,
    retention: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if let Err(e) = sweep_expired(&state, retention).await {
            tracing::error!(error = %e, "Retention sweep failed");
        }
    }
}
