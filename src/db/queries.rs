use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{
    AnalysisJob, ArtifactMeta, JobFilter, JobStatus, NewJob, StageOutputs, TerminalUpdate,
};
use crate::services::store::{JobStore, StoreError};

const JOB_COLUMNS: &str = r#"
    id, submitter_id, artifact_fingerprint, directive, filename, size_bytes,
    artifact_locator, status, stage_outputs, error, created_at, started_at,
    completed_at, processing_time
"#;

/// PostgreSQL-backed job store.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn job_from_row(r: &PgRow) -> Result<AnalysisJob, StoreError> {
    let id: Uuid = r.try_get("id")?;
    let status_str: String = r.try_get("status")?;
    let status = status_str.parse::<JobStatus>().map_err(|_| StoreError::Corrupt {
        id,
        reason: format!("unknown status '{}'", status_str),
    })?;
    let Json(stage_outputs): Json<StageOutputs> = r.try_get("stage_outputs")?;

    Ok(AnalysisJob {
        id,
        submitter_id: r.try_get("submitter_id")?,
        artifact_fingerprint: r.try_get("artifact_fingerprint")?,
        directive: r.try_get("directive")?,
        artifact: ArtifactMeta {
            filename: r.try_get("filename")?,
            size_bytes: r.try_get("size_bytes")?,
            locator: r.try_get("artifact_locator")?,
        },
        status,
        stage_outputs,
        error: r.try_get("error")?,
        created_at: r.try_get("created_at")?,
        started_at: r.try_get("started_at")?,
        completed_at: r.try_get("completed_at")?,
        processing_time: r.try_get("processing_time")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    #[tracing::instrument(skip(self, new), fields(fingerprint = %new.artifact_fingerprint))]
    async fn create(&self, new: NewJob) -> Result<AnalysisJob, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO analysis_jobs
                (id, submitter_id, artifact_fingerprint, directive, filename, size_bytes,
                 artifact_locator, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'queued')
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.submitter_id)
            .bind(&new.artifact_fingerprint)
            .bind(&new.directive)
            .bind(&new.artifact.filename)
            .bind(new.artifact.size_bytes)
            .bind(&new.artifact.locator)
            .fetch_one(&self.pool)
            .await?;

        job_from_row(&row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<AnalysisJob>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM analysis_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn mark_processing(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = 'processing',
                started_at = COALESCE(started_at, NOW())
            WHERE id = $1 AND status IN ('queued', 'processing')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self, output))]
    async fn append_stage_output(
        &self,
        id: Uuid,
        stage: &str,
        output: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT stage_outputs
            FROM analysis_jobs
            WHERE id = $1 AND status = 'processing'
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(());
        };

        let Json(mut outputs): Json<StageOutputs> = row.try_get("stage_outputs")?;
        outputs.insert(stage, output);

        sqlx::query("UPDATE analysis_jobs SET stage_outputs = $1 WHERE id = $2")
            .bind(Json(&outputs))
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, update), fields(status = %update.status))]
    async fn update_terminal(&self, id: Uuid, update: TerminalUpdate) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT stage_outputs
            FROM analysis_jobs
            WHERE id = $1 AND status IN ('queued', 'processing')
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(false);
        };

        let Json(mut outputs): Json<StageOutputs> = row.try_get("stage_outputs")?;
        outputs.merge(&update.stage_outputs);

        sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = $1,
                stage_outputs = $2,
                error = $3,
                processing_time = $4,
                completed_at = NOW()
            WHERE id = $5
            "#,
        )
        .bind(update.status.to_string())
        .bind(Json(&outputs))
        .bind(&update.error)
        .bind(update.processing_time)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<AnalysisJob>, StoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM analysis_jobs
            WHERE ($1::text IS NULL OR submitter_id = $1)
            ORDER BY created_at DESC
            OFFSET $2
            LIMIT $3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(&filter.submitter_id)
            .bind(filter.offset.max(0))
            .bind(filter.limit.max(0))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn delete(&self, id: Uuid) -> Result<Option<AnalysisJob>, StoreError> {
        let sql = format!("DELETE FROM analysis_jobs WHERE id = $1 RETURNING {JOB_COLUMNS}");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn find_recent_completed(
        &self,
        fingerprint: &str,
        window: Duration,
    ) -> Result<Option<AnalysisJob>, StoreError> {
        let cutoff = Utc::now() - window;
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM analysis_jobs
            WHERE artifact_fingerprint = $1
              AND status = 'completed'
              AND created_at >= $2
            ORDER BY created_at DESC
            LIMIT 1
            "#
        );
        let row = sqlx::query(&sql)
            .bind(fingerprint)
            .bind(cutoff)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn delete_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AnalysisJob>, StoreError> {
        let sql = format!(
            "DELETE FROM analysis_jobs WHERE created_at < $1 RETURNING {JOB_COLUMNS}"
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
