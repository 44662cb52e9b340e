use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::job::{AnalysisJob, JobFilter, JobStatus, NewJob, StageOutputs, TerminalUpdate};
use crate::services::fingerprint::within_window;
use crate::services::store::{JobStore, StoreError};

/// Process-local job store for tests and single-process runs.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, AnalysisJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Test hook for placing a job at an arbitrary creation time.
    pub async fn backdate(&self, id: Uuid, created_at: DateTime<Utc>) {
        if let Some(job) = self.jobs.write().await.get_mut(&id) {
            job.created_at = created_at;
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, new: NewJob) -> Result<AnalysisJob, StoreError> {
        let job = AnalysisJob {
            id: Uuid::new_v4(),
            submitter_id: new.submitter_id,
            artifact_fingerprint: new.artifact_fingerprint,
            directive: new.directive,
            artifact: new.artifact,
            status: JobStatus::Queued,
            stage_outputs: StageOutputs::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            processing_time: None,
        };
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<AnalysisJob>, StoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn mark_processing(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = JobStatus::Processing;
                job.started_at.get_or_insert_with(Utc::now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_stage_output(
        &self,
        id: Uuid,
        stage: &str,
        output: &str,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&id) {
            if job.status == JobStatus::Processing {
                job.stage_outputs.insert(stage, output);
            }
        }
        Ok(())
    }

    async fn update_terminal(&self, id: Uuid, update: TerminalUpdate) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() => {
                job.stage_outputs.merge(&update.stage_outputs);
                job.status = update.status;
                job.error = update.error;
                job.processing_time = Some(update.processing_time);
                job.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<AnalysisJob>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<&AnalysisJob> = jobs
            .values()
            .filter(|j| match &filter.submitter_id {
                Some(s) => j.submitter_id.as_deref() == Some(s.as_str()),
                None => true,
            })
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<Option<AnalysisJob>, StoreError> {
        Ok(self.jobs.write().await.remove(&id))
    }

    async fn find_recent_completed(
        &self,
        fingerprint: &str,
        window: Duration,
    ) -> Result<Option<AnalysisJob>, StoreError> {
        let now = Utc::now();
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Completed
                    && j.artifact_fingerprint == fingerprint
                    && within_window(j.created_at, window, now)
            })
            .max_by_key(|j| j.created_at)
            .cloned())
    }

    async fn delete_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AnalysisJob>, StoreError> {
        let mut jobs = self.jobs.write().await;
        let expired: Vec<Uuid> = jobs
            .values()
            .filter(|j| j.created_at < cutoff)
            .map(|j| j.id)
            .collect();
        Ok(expired
            .into_iter()
            .filter_map(|id| jobs.remove(&id))
            .collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::ArtifactMeta;

    fn new_job(fingerprint: &str, submitter: Option<&str>) -> NewJob {
        NewJob {
            submitter_id: submitter.map(str::to_string),
            artifact_fingerprint: fingerprint.to_string(),
            directive: "summarize".to_string(),
            artifact: ArtifactMeta {
                filename: "report.pdf".to_string(),
                size_bytes: 42,
                locator: format!("lab_report_{}.pdf.enc", Uuid::new_v4()),
            },
        }
    }

    #[tokio::test]
    async fn test_create_assigns_unique_ids_and_queued_status() {
        let store = InMemoryJobStore::new();
        let a = store.create(new_job("f1", None)).await.unwrap();
        let b = store.create(new_job("f1", None)).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.status, JobStatus::Queued);
        assert!(a.stage_outputs.is_empty());
        assert!(a.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_terminal_update_applies_once() {
        let store = InMemoryJobStore::new();
        let job = store.create(new_job("f1", None)).await.unwrap();
        assert!(store.mark_processing(job.id).await.unwrap());

        let mut outputs = StageOutputs::new();
        outputs.insert("verification", "looks like a lab report");
        assert!(store
            .update_terminal(job.id, TerminalUpdate::completed(outputs, 1.5))
            .await
            .unwrap());
        let first = store.get(job.id).await.unwrap().unwrap();

        let applied = store
            .update_terminal(
                job.id,
                TerminalUpdate::failed(StageOutputs::new(), "late".to_string(), 9.0),
            )
            .await
            .unwrap();
        assert!(!applied);
        assert!(!store.mark_processing(job.id).await.unwrap());
        store
            .append_stage_output(job.id, "verification", "overwritten")
            .await
            .unwrap();

        assert_eq!(store.get(job.id).await.unwrap().unwrap(), first);
    }

    #[tokio::test]
    async fn test_terminal_update_on_missing_job_is_noop() {
        let store = InMemoryJobStore::new();
        let applied = store
            .update_terminal(
                Uuid::new_v4(),
                TerminalUpdate::completed(StageOutputs::new(), 0.1),
            )
            .await
            .unwrap();
        assert!(!applied);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let store = InMemoryJobStore::new();
        for _ in 0..3 {
            store.create(new_job("f", Some("alice"))).await.unwrap();
        }
        store.create(new_job("f", Some("bob"))).await.unwrap();

        let alice = JobFilter {
            submitter_id: Some("alice".to_string()),
            offset: 0,
            limit: 10,
        };
        assert_eq!(store.list(&alice).await.unwrap().len(), 3);

        let page = JobFilter {
            submitter_id: None,
            offset: 1,
            limit: 2,
        };
        assert_eq!(store.list(&page).await.unwrap().len(), 2);

        let past_end = JobFilter {
            submitter_id: None,
            offset: 100,
            limit: 10,
        };
        assert!(store.list(&past_end).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_recent_completed_respects_status_and_window() {
        let store = InMemoryJobStore::new();
        let queued = store.create(new_job("same", None)).await.unwrap();
        assert!(store
            .find_recent_completed("same", Duration::hours(24))
            .await
            .unwrap()
            .is_none());

        store.mark_processing(queued.id).await.unwrap();
        store
            .update_terminal(queued.id, TerminalUpdate::completed(StageOutputs::new(), 1.0))
            .await
            .unwrap();
        let found = store
            .find_recent_completed("same", Duration::hours(24))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, queued.id);

        store
            .backdate(queued.id, Utc::now() - Duration::hours(30))
            .await;
        assert!(store
            .find_recent_completed("same", Duration::hours(24))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_created_before() {
        let store = InMemoryJobStore::new();
        let old = store.create(new_job("a", None)).await.unwrap();
        let fresh = store.create(new_job("b", None)).await.unwrap();
        store.backdate(old.id, Utc::now() - Duration::days(31)).await;

        let removed = store
            .delete_created_before(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, old.id);
        assert!(store.get(fresh.id).await.unwrap().is_some());
    }
}
