use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

const QUEUE_KEY: &str = "lab_report:tasks";
const PROCESSING_KEY: &str = "lab_report:processing";
const LEASES_KEY: &str = "lab_report:leases";
const DELAYED_KEY: &str = "lab_report:delayed";
const REVOKED_PREFIX: &str = "lab_report:revoked:";
const REVOKED_TTL_SECS: u64 = 7 * 24 * 3600;

/// Task payload handed to the workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisTask {
    pub task_id: Uuid,
    pub job_id: Uuid,
    /// Staged artifact this task reads. Passed explicitly to every stage.
    pub artifact_locator: String,
    pub directive: String,
    pub filename: String,
    /// Retries already consumed by this task; 0 on first delivery.
    pub attempt: u32,
}

impl AnalysisTask {
    pub fn new(job_id: Uuid, artifact_locator: String, directive: String, filename: String) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            job_id,
            artifact_locator,
            directive,
            filename,
            attempt: 0,
        }
    }

    /// The same task scheduled for its next attempt.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub ready: u64,
    pub in_flight: u64,
    pub delayed: u64,
}

/// At-least-once task dispatch.
///
/// A dequeued task stays leased until it is acknowledged. Leases that outlive
/// the visibility timeout are handed back to the ready queue by
/// `reclaim_expired`, so a crashed worker's task is redelivered.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: &AnalysisTask) -> Result<(), QueueError>;

    /// Non-blocking pop. Due delayed tasks are promoted first.
    async fn dequeue(&self) -> Result<Option<AnalysisTask>, QueueError>;

    /// Release the lease of a finished delivery.
    async fn ack(&self, task: &AnalysisTask) -> Result<(), QueueError>;

    /// Schedule `task` for delivery once `delay` has elapsed.
    async fn retry(&self, task: &AnalysisTask, delay: Duration) -> Result<(), QueueError>;

    /// Return expired leases to the ready queue. Returns how many were reclaimed.
    async fn reclaim_expired(&self) -> Result<usize, QueueError>;

    async fn revoke(&self, job_id: Uuid) -> Result<(), QueueError>;

    async fn is_revoked(&self, job_id: Uuid) -> Result<bool, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Promote due retries, then pop one ready task into the in-flight list and
/// lease it. One script so a lost connection can never leave an unleased
/// task in the in-flight list.
const DEQUEUE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, payload in ipairs(due) do
    redis.call('ZREM', KEYS[1], payload)
    redis.call('LPUSH', KEYS[2], payload)
end
local payload = redis.call('RPOPLPUSH', KEYS[2], KEYS[3])
if payload then
    redis.call('ZADD', KEYS[4], ARGV[2], payload)
end
return payload
"#;

const ACK_SCRIPT: &str = r#"
redis.call('LREM', KEYS[1], 1, ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
return 1
"#;

/// Return expired leases to the ready queue, plus any in-flight payload that
/// has no lease at all.
const RECLAIM_SCRIPT: &str = r#"
local reclaimed = 0
local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, payload in ipairs(expired) do
    redis.call('ZREM', KEYS[1], payload)
    redis.call('LREM', KEYS[2], 1, payload)
    redis.call('LPUSH', KEYS[3], payload)
    reclaimed = reclaimed + 1
end
for _, payload in ipairs(redis.call('LRANGE', KEYS[2], 0, -1)) do
    if not redis.call('ZSCORE', KEYS[1], payload) then
        redis.call('LREM', KEYS[2], 1, payload)
        redis.call('LPUSH', KEYS[3], payload)
        reclaimed = reclaimed + 1
    end
end
return reclaimed
"#;

/// Redis-backed task queue with lease and delayed-retry support.
///
/// Every operation touching more than one key runs as a Lua script, so the
/// ready list, in-flight list and lease set always change together.
pub struct RedisTaskQueue {
    client: redis::Client,
    visibility_timeout: Duration,
    dequeue_script: redis::Script,
    ack_script: redis::Script,
    reclaim_script: redis::Script,
}

impl RedisTaskQueue {
    pub fn new(redis_url: &str, visibility_timeout: Duration) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            visibility_timeout,
            dequeue_script: redis::Script::new(DEQUEUE_SCRIPT),
            ack_script: redis::Script::new(ACK_SCRIPT),
            reclaim_script: redis::Script::new(RECLAIM_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }
}

fn epoch_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, task: &AnalysisTask) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(task).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<AnalysisTask>, QueueError> {
        let mut conn = self.connection().await?;
        let now = epoch_secs();
        let deadline = now + self.visibility_timeout.as_secs_f64();

        let payload: Option<String> = self
            .dequeue_script
            .key(DELAYED_KEY)
            .key(QUEUE_KEY)
            .key(PROCESSING_KEY)
            .key(LEASES_KEY)
            .arg(now)
            .arg(deadline)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        payload
            .map(|p| serde_json::from_str(&p).map_err(QueueError::Serialize))
            .transpose()
    }

    async fn ack(&self, task: &AnalysisTask) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(task).map_err(QueueError::Serialize)?;
        self.ack_script
            .key(PROCESSING_KEY)
            .key(LEASES_KEY)
            .arg(payload)
            .invoke_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn retry(&self, task: &AnalysisTask, delay: Duration) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(task).map_err(QueueError::Serialize)?;
        let ready_at = epoch_secs() + delay.as_secs_f64();
        conn.zadd::<_, _, _, ()>(DELAYED_KEY, &payload, ready_at)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;
        let reclaimed: usize = self
            .reclaim_script
            .key(LEASES_KEY)
            .key(PROCESSING_KEY)
            .key(QUEUE_KEY)
            .arg(epoch_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(reclaimed)
    }

    async fn revoke(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(format!("{REVOKED_PREFIX}{job_id}"), 1, REVOKED_TTL_SECS)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn is_revoked(&self, job_id: Uuid) -> Result<bool, QueueError> {
        let mut conn = self.connection().await?;
        let revoked: bool = conn
            .exists(format!("{REVOKED_PREFIX}{job_id}"))
            .await
            .map_err(QueueError::Redis)?;
        Ok(revoked)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.connection().await?;
        let ready: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        let in_flight: u64 = conn.llen(PROCESSING_KEY).await.map_err(QueueError::Redis)?;
        let delayed: u64 = conn.zcard(DELAYED_KEY).await.map_err(QueueError::Redis)?;
        Ok(QueueStats {
            ready,
            in_flight,
            delayed,
        })
    }

    /// Check Redis connectivity (for health checks).
    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_attempt_keeps_identity() {
        let task = AnalysisTask::new(
            Uuid::new_v4(),
            "lab_report_x.pdf.enc".to_string(),
            "summarize".to_string(),
            "report.pdf".to_string(),
        );
        let retry = task.next_attempt().next_attempt();

        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.task_id, task.task_id);
        assert_eq!(retry.job_id, task.job_id);
        assert_eq!(retry.artifact_locator, task.artifact_locator);
    }

    #[test]
    fn test_payload_serialization_is_stable() {
        let task = AnalysisTask::new(
            Uuid::new_v4(),
            "lab_report_x.pdf.enc".to_string(),
            "summarize".to_string(),
            "report.pdf".to_string(),
        );
        // ack relies on re-serializing to the exact payload stored at enqueue time
        let a = serde_json::to_string(&task).unwrap();
        let b = serde_json::to_string(&task.clone()).unwrap();
        assert_eq!(a, b);
    }
}
