use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::services::queue::{AnalysisTask, QueueError, QueueStats, TaskQueue};

#[derive(Default)]
struct QueueState {
    ready: VecDeque<AnalysisTask>,
    in_flight: HashMap<Uuid, (AnalysisTask, Instant)>,
    delayed: Vec<(Instant, AnalysisTask)>,
    revoked: HashSet<Uuid>,
}

/// Process-local task queue with the same lease semantics as the Redis queue.
pub struct InMemoryTaskQueue {
    state: Mutex<QueueState>,
    visibility_timeout: Duration,
}

impl InMemoryTaskQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            visibility_timeout,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // A poisoned lock only means another test thread panicked mid-update.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(960))
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: &AnalysisTask) -> Result<(), QueueError> {
        self.lock().ready.push_back(task.clone());
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<AnalysisTask>, QueueError> {
        let now = Instant::now();
        let mut state = self.lock();

        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.delayed)
            .into_iter()
            .partition(|(ready_at, _)| *ready_at <= now);
        state.delayed = pending;
        state.ready.extend(due.into_iter().map(|(_, task)| task));

        let Some(task) = state.ready.pop_front() else {
            return Ok(None);
        };
        state
            .in_flight
            .insert(task.task_id, (task.clone(), now + self.visibility_timeout));
        Ok(Some(task))
    }

    async fn ack(&self, task: &AnalysisTask) -> Result<(), QueueError> {
        self.lock().in_flight.remove(&task.task_id);
        Ok(())
    }

    async fn retry(&self, task: &AnalysisTask, delay: Duration) -> Result<(), QueueError> {
        self.lock()
            .delayed
            .push((Instant::now() + delay, task.clone()));
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<usize, QueueError> {
        let now = Instant::now();
        let mut state = self.lock();
        let expired: Vec<Uuid> = state
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some((task, _)) = state.in_flight.remove(id) {
                state.ready.push_back(task);
            }
        }
        Ok(expired.len())
    }

    async fn revoke(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.lock().revoked.insert(job_id);
        Ok(())
    }

    async fn is_revoked(&self, job_id: Uuid) -> Result<bool, QueueError> {
        Ok(self.lock().revoked.contains(&job_id))
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let state = self.lock();
        Ok(QueueStats {
            ready: state.ready.len() as u64,
            in_flight: state.in_flight.len() as u64,
            delayed: state.delayed.len() as u64,
        })
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
