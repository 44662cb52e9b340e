use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::job::{AnalysisJob, JobFilter, NewJob, TerminalUpdate};

/// Durable record of analysis jobs.
///
/// Each job is mutated by exactly one worker delivery at a time, so the store
/// only has to make individual updates atomic. Once a job is terminal every
/// mutating call against it is a no-op.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job with status `queued`.
    async fn create(&self, job: NewJob) -> Result<AnalysisJob, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<AnalysisJob>, StoreError>;

    /// Move a `queued` (or redelivered `processing`) job to `processing`.
    /// Returns false when the job is missing or already terminal.
    async fn mark_processing(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Record one stage output while the job is `processing`.
    async fn append_stage_output(
        &self,
        id: Uuid,
        stage: &str,
        output: &str,
    ) -> Result<(), StoreError>;

    /// Apply the terminal transition and stamp `completed_at`.
    /// Returns false when the job is missing or already terminal.
    async fn update_terminal(&self, id: Uuid, update: TerminalUpdate) -> Result<bool, StoreError>;

    /// Jobs newest first. Offsets past the end yield an empty page.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<AnalysisJob>, StoreError>;

    /// Remove a job, returning the removed record.
    async fn delete(&self, id: Uuid) -> Result<Option<AnalysisJob>, StoreError>;

    /// Most recent completed job with this fingerprint created within `window`.
    async fn find_recent_completed(
        &self,
        fingerprint: &str,
        window: Duration,
    ) -> Result<Option<AnalysisJob>, StoreError>;

    /// Remove every job created before `cutoff`, returning the removed records.
    async fn delete_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AnalysisJob>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store query failed: {0}")]
    Query(String),

    #[error("corrupt job record {id}: {reason}")]
    Corrupt { id: Uuid, reason: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Connection(err.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}
