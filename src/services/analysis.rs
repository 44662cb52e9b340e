use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::analysis::{
    DeleteResponse, JobSummary, ListQuery, ListResponse, QueueStatusView, ReportDownload,
    ResultView, StatusView, SubmitRequest, SubmitResponse, DISCLAIMER,
};
use crate::models::job::{ArtifactMeta, JobFilter, JobStatus, NewJob};
use crate::pipeline::ReportHeader;
use crate::services::fingerprint::fingerprint;
use crate::services::queue::{AnalysisTask, QueueError};
use crate::services::storage::StorageError;
use crate::services::store::StoreError;

const DEFAULT_FILENAME: &str = "lab_report.pdf";
const MAX_PAGE_SIZE: i64 = 100;

/// Caller-facing operations on analysis jobs. Handlers are thin adapters
/// over these; nothing here waits on pipeline execution.
pub struct AnalysisService<'a> {
    state: &'a AppState,
}

impl<'a> AnalysisService<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    /// Validate an upload, reuse a recent identical analysis or stage and
    /// enqueue a new one.
    pub async fn submit(
        &self,
        data: &[u8],
        request: SubmitRequest,
    ) -> Result<SubmitResponse, AnalysisError> {
        let settings = &self.state.settings;

        if data.is_empty() {
            return Err(AnalysisError::Validation(
                "uploaded file is empty".to_string(),
            ));
        }
        if data.len() > settings.max_upload_bytes {
            return Err(AnalysisError::TooLarge {
                limit: settings.max_upload_bytes,
            });
        }
        request
            .validate()
            .map_err(|e| AnalysisError::Validation(e.to_string()))?;

        let filename = request
            .filename
            .unwrap_or_else(|| DEFAULT_FILENAME.to_string());
        if !filename.to_ascii_lowercase().ends_with(".pdf") || !self.state.extractor.supports(data) {
            return Err(AnalysisError::UnsupportedType);
        }

        let directive = request
            .directive
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| settings.default_directive.clone());

        let digest = fingerprint(data);
        let cached = self
            .state
            .store
            .find_recent_completed(&digest, settings.dedup_window)
            .await?;
        if let Some(existing) = cached {
            metrics::counter!("analysis_jobs_deduplicated").increment(1);
            tracing::info!(job_id = %existing.id, "Reusing recent analysis of identical upload");
            return Ok(SubmitResponse {
                job_id: existing.id,
                task_id: "cached".to_string(),
                status: JobStatus::Completed,
                message: "Analysis already exists for this file. Returning cached results."
                    .to_string(),
            });
        }

        let locator = self.state.storage.stage(data).await?;

        let new_job = NewJob {
            submitter_id: request.submitter_id,
            artifact_fingerprint: digest,
            directive: directive.clone(),
            artifact: ArtifactMeta {
                filename: filename.clone(),
                size_bytes: data.len() as i64,
                locator: locator.clone(),
            },
        };
        let job = match self.state.store.create(new_job).await {
            Ok(job) => job,
            Err(e) => {
                self.discard_staged(&locator).await;
                return Err(e.into());
            }
        };

        let task = AnalysisTask::new(job.id, locator.clone(), directive, filename);
        if let Err(e) = self.state.queue.enqueue(&task).await {
            tracing::error!(job_id = %job.id, error = %e, "Enqueue failed, rolling back submission");
            if let Err(del) = self.state.store.delete(job.id).await {
                tracing::warn!(job_id = %job.id, error = %del, "Could not remove unqueued job");
            }
            self.discard_staged(&locator).await;
            return Err(e.into());
        }

        metrics::counter!("analysis_jobs_submitted").increment(1);
        tracing::info!(
            job_id = %job.id,
            task_id = %task.task_id,
            size_bytes = data.len(),
            "Analysis queued"
        );

        Ok(SubmitResponse {
            job_id: job.id,
            task_id: task.task_id.to_string(),
            status: JobStatus::Queued,
            message: "Lab report queued for analysis. Poll the status endpoint for progress."
                .to_string(),
        })
    }

    pub async fn status(&self, id: Uuid) -> Result<StatusView, AnalysisError> {
        let job = self.find(id).await?;
        Ok(StatusView::from(&job))
    }

    /// Full results. Jobs that have not completed are `NotReady`, not `NotFound`.
    pub async fn result(&self, id: Uuid) -> Result<ResultView, AnalysisError> {
        let job = self.find(id).await?;
        if job.status != JobStatus::Completed {
            return Err(AnalysisError::NotReady(job.status));
        }

        let report = self
            .state
            .pipeline
            .aggregate(&ReportHeader::for_job(&job), &job.stage_outputs);

        Ok(ResultView {
            job_id: job.id,
            status: job.status,
            directive: job.directive,
            filename: job.artifact.filename,
            stage_outputs: job.stage_outputs,
            report,
            processing_time: job.processing_time,
            completed_at: job.completed_at,
            disclaimer: DISCLAIMER.to_string(),
        })
    }

    /// The aggregate document written by the worker. Rebuilt from the record
    /// if the file has gone missing.
    pub async fn report(&self, id: Uuid) -> Result<ReportDownload, AnalysisError> {
        let job = self.find(id).await?;
        if job.status != JobStatus::Completed {
            return Err(AnalysisError::NotReady(job.status));
        }

        let content = match self.state.storage.read_report(id).await {
            Ok(content) => content,
            Err(StorageError::NotFound(_)) => {
                tracing::warn!(job_id = %id, "Report file missing, rendering from record");
                self.state
                    .pipeline
                    .aggregate(&ReportHeader::for_job(&job), &job.stage_outputs)
            }
            Err(e) => return Err(e.into()),
        };

        Ok(ReportDownload {
            filename: format!("lab_analysis_report_{}.txt", id),
            content,
        })
    }

    pub async fn list(&self, query: ListQuery) -> Result<ListResponse, AnalysisError> {
        if query.offset < 0 {
            return Err(AnalysisError::Validation(
                "offset must not be negative".to_string(),
            ));
        }
        let limit = query.limit.clamp(1, MAX_PAGE_SIZE);

        let jobs = self
            .state
            .store
            .list(&JobFilter {
                submitter_id: query.submitter_id,
                offset: query.offset,
                limit,
            })
            .await?;

        let analyses: Vec<JobSummary> = jobs.iter().map(JobSummary::from).collect();
        Ok(ListResponse {
            count: analyses.len(),
            analyses,
            offset: query.offset,
            limit,
        })
    }

    /// Remove a job with its staged artifact and report, revoking any queued task.
    pub async fn delete(&self, id: Uuid) -> Result<DeleteResponse, AnalysisError> {
        let job = self
            .state
            .store
            .delete(id)
            .await?
            .ok_or(AnalysisError::NotFound(id))?;

        if !job.status.is_terminal() {
            if let Err(e) = self.state.queue.revoke(id).await {
                tracing::warn!(job_id = %id, error = %e, "Could not revoke queued task");
            }
        }
        self.discard_staged(&job.artifact.locator).await;
        if let Err(e) = self.state.storage.remove_report(id).await {
            tracing::warn!(job_id = %id, error = %e, "Could not remove report file");
        }

        tracing::info!(job_id = %id, status = %job.status, "Analysis deleted");
        Ok(DeleteResponse {
            job_id: id,
            message: "Analysis deleted successfully".to_string(),
        })
    }

    pub async fn queue_status(&self) -> Result<QueueStatusView, AnalysisError> {
        let stats = self
            .state
            .queue
            .stats()
            .await?;
        metrics::gauge!("analysis_queue_depth").set(stats.ready as f64);

        Ok(QueueStatusView {
            ready: stats.ready,
            in_flight: stats.in_flight,
            delayed: stats.delayed,
            timestamp: chrono::Utc::now(),
        })
    }

    async fn find(&self, id: Uuid) -> Result<crate::models::job::AnalysisJob, AnalysisError> {
        self.state
            .store
            .get(id)
            .await?
            .ok_or(AnalysisError::NotFound(id))
    }

    async fn discard_staged(&self, locator: &str) {
        if let Err(e) = self.state.storage.remove(locator).await {
            tracing::warn!(locator, error = %e, "Could not remove staged artifact");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("{0}")]
    Validation(String),

    #[error("file too large, maximum size is {limit} bytes")]
    TooLarge { limit: usize },

    #[error("only PDF lab reports are supported")]
    UnsupportedType,

    #[error("analysis {0} not found")]
    NotFound(Uuid),

    #[error("analysis is not completed yet, current status: {0}")]
    NotReady(JobStatus),

    #[error("service temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    fn unavailable(err: impl std::fmt::Display) -> Self {
        AnalysisError::Unavailable(err.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AnalysisError::Validation(_) => StatusCode::BAD_REQUEST,
            AnalysisError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AnalysisError::UnsupportedType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AnalysisError::NotFound(_) => StatusCode::NOT_FOUND,
            AnalysisError::NotReady(_) => StatusCode::CONFLICT,
            AnalysisError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AnalysisError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for AnalysisError {
    fn from(err: StorageError) -> Self {
        AnalysisError::Internal(err.to_string())
    }
}

impl From<StoreError> for AnalysisError {
    fn from(err: StoreError) -> Self {
        AnalysisError::unavailable(err)
    }
}

impl From<QueueError> for AnalysisError {
    fn from(err: QueueError) -> Self {
        AnalysisError::unavailable(err)
    }
}

impl IntoResponse for AnalysisError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            AnalysisError::Unavailable(msg) => tracing::error!("Backend unavailable: {}", msg),
            AnalysisError::Internal(msg) => tracing::error!("Internal error: {}", msg),
            _ => tracing::debug!(status = status.as_u16(), error = %self, "Request rejected"),
        }

        let message = match self {
            AnalysisError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
