use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{AnalysisJob, JobStatus, StageOutputs};

pub const DISCLAIMER: &str = "MEDICAL DISCLAIMER: This analysis is for educational purposes only \
and does not constitute medical advice, diagnosis, or treatment. Always consult with qualified \
healthcare providers for medical decisions based on your specific health conditions and \
circumstances.";

/// Caller-supplied metadata accompanying an upload.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct SubmitRequest {
    #[garde(length(max = 2000))]
    pub directive: Option<String>,

    #[garde(length(min = 1, max = 200))]
    pub submitter_id: Option<String>,

    #[garde(length(min = 1, max = 255))]
    pub filename: Option<String>,
}

/// Response after submitting a report for analysis.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    /// Queue task handle, or `"cached"` when a recent result was reused.
    pub task_id: String,
    pub status: JobStatus,
    pub message: String,
}

/// Client-facing status projection. Never carries stage outputs.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub directive: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&AnalysisJob> for StatusView {
    fn from(job: &AnalysisJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            directive: job.directive.clone(),
            filename: job.artifact.filename.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            processing_time: job.processing_time,
            error: if job.status.is_terminal() {
                job.error.clone()
            } else {
                None
            },
        }
    }
}

/// Full results of a completed job.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub directive: String,
    pub filename: String,
    pub stage_outputs: StageOutputs,
    pub report: String,
    pub processing_time: Option<f64>,
    pub completed_at: Option<DateTime<Utc>>,
    pub disclaimer: String,
}

/// One row of a job listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub filename: String,
    pub directive: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time: Option<f64>,
}

impl From<&AnalysisJob> for JobSummary {
    fn from(job: &AnalysisJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            filename: job.artifact.filename.clone(),
            directive: job.directive.clone(),
            created_at: job.created_at,
            completed_at: job.completed_at,
            processing_time: job.processing_time,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub submitter_id: Option<String>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub analyses: Vec<JobSummary>,
    pub count: usize,
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub job_id: Uuid,
    pub message: String,
}

/// Snapshot of the task queue.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueueStatusView {
    pub ready: u64,
    pub in_flight: u64,
    pub delayed: u64,
    pub timestamp: DateTime<Utc>,
}

/// A finished aggregate document ready for download.
#[derive(Debug, Clone)]
pub struct ReportDownload {
    pub filename: String,
    pub content: String,
}
