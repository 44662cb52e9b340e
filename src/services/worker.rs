use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::config::TimeLimits;
use crate::models::job::{StageOutputs, TerminalUpdate};
use crate::pipeline::{
    PipelineExecutor, PipelineFailure, PipelineOutput, PipelineRun, ReportHeader, StageObserver,
};
use crate::services::extraction::ExtractionError;
use crate::services::queue::{AnalysisTask, QueueError};
use crate::services::retry::FailureKind;
use crate::services::storage::StorageError;
use crate::services::store::{JobStore, StoreError};

/// Persists each stage output as soon as it is produced.
struct StoreObserver<'a> {
    store: &'a dyn JobStore,
    job_id: Uuid,
}

#[async_trait]
impl StageObserver for StoreObserver<'_> {
    async fn stage_completed(&self, stage: &str, output: &str) {
        if let Err(e) = self
            .store
            .append_stage_output(self.job_id, stage, output)
            .await
        {
            tracing::warn!(job_id = %self.job_id, stage, error = %e, "Could not persist stage output");
        }
    }
}

/// Process the next task from the queue.
/// Returns Ok(true) if a task was handled, Ok(false) if the queue was empty.
///
/// Store and queue failures are returned without acknowledging the task; its
/// lease then expires and the task is redelivered.
pub async fn process_next_task(state: &AppState) -> Result<bool, TaskError> {
    let Some(task) = state.queue.dequeue().await? else {
        return Ok(false);
    };

    tracing::info!(
        job_id = %task.job_id,
        task_id = %task.task_id,
        attempt = task.attempt,
        "Processing analysis task"
    );

    if state.queue.is_revoked(task.job_id).await? {
        tracing::info!(job_id = %task.job_id, "Task revoked, dropping");
        discard_artifact(state, &task).await;
        state.queue.ack(&task).await?;
        return Ok(true);
    }

    let job = match state.store.get(task.job_id).await? {
        Some(job) => job,
        None => {
            tracing::warn!(job_id = %task.job_id, "Job record gone, dropping task");
            discard_artifact(state, &task).await;
            state.queue.ack(&task).await?;
            return Ok(true);
        }
    };

    // A crash between the terminal write and the cleanup leaves the staged
    // upload behind, so a redelivery still removes it.
    if job.status.is_terminal() {
        tracing::info!(job_id = %job.id, status = %job.status, "Job already finished, skipping redelivery");
        discard_artifact(state, &task).await;
        state.queue.ack(&task).await?;
        return Ok(true);
    }

    if !state.store.mark_processing(task.job_id).await? {
        tracing::info!(job_id = %task.job_id, "Job finished or removed concurrently, dropping task");
        discard_artifact(state, &task).await;
        state.queue.ack(&task).await?;
        return Ok(true);
    }

    let started = Instant::now();
    let outcome = run_attempt(state, &task).await;
    let elapsed = started.elapsed().as_secs_f64();

    match outcome {
        Ok(output) => finish_success(state, &task, output.outputs, elapsed).await?,
        Err(err) => finish_failure(state, &task, err, elapsed).await?,
    }

    Ok(true)
}

async fn run_attempt(state: &AppState, task: &AnalysisTask) -> Result<PipelineOutput, TaskError> {
    let data = state
        .storage
        .read(&task.artifact_locator)
        .await
        .map_err(|e| match e {
            StorageError::NotFound(locator) => TaskError::ArtifactMissing(locator),
            other => TaskError::Storage(other),
        })?;

    let text = state.extractor.extract_text(&data).await?;
    tracing::debug!(job_id = %task.job_id, text_chars = text.len(), "Text extracted");

    let observer = StoreObserver {
        store: state.store.as_ref(),
        job_id: task.job_id,
    };

    run_with_limits(
        &state.pipeline,
        PipelineInputs {
            text: &text,
            directive: &task.directive,
            artifact_locator: &task.artifact_locator,
            observer: &observer,
        },
        state.settings.limits,
    )
    .await
}

struct PipelineInputs<'a> {
    text: &'a str,
    directive: &'a str,
    artifact_locator: &'a str,
    observer: &'a dyn StageObserver,
}

/// Runs one attempt under the two-tier time limit. Crossing the soft limit
/// raises the cooperative interrupt; crossing the hard limit drops the run.
async fn run_with_limits(
    pipeline: &PipelineExecutor,
    inputs: PipelineInputs<'_>,
    limits: TimeLimits,
) -> Result<PipelineOutput, TaskError> {
    let interrupt = Arc::new(AtomicBool::new(false));

    let soft_timer = {
        let interrupt = Arc::clone(&interrupt);
        let soft = limits.soft;
        tokio::spawn(async move {
            tokio::time::sleep(soft).await;
            tracing::warn!(
                limit_secs = soft.as_secs(),
                "Soft time limit reached, interrupting after the current stage"
            );
            interrupt.store(true, Ordering::SeqCst);
        })
    };

    let run = pipeline.run(PipelineRun {
        text: inputs.text,
        directive: inputs.directive,
        artifact_locator: inputs.artifact_locator,
        interrupt: Some(interrupt.as_ref()),
        observer: Some(inputs.observer),
    });
    let result = tokio::time::timeout(limits.hard, run).await;
    soft_timer.abort();

    match result {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(failure)) => Err(TaskError::Pipeline(failure)),
        Err(_) => Err(TaskError::HardTimeLimit(limits.hard)),
    }
}

async fn finish_success(
    state: &AppState,
    task: &AnalysisTask,
    outputs: StageOutputs,
    elapsed: f64,
) -> Result<(), TaskError> {
    let applied = state
        .store
        .update_terminal(task.job_id, TerminalUpdate::completed(outputs, elapsed))
        .await?;

    if applied {
        metrics::counter!("analysis_jobs_completed").increment(1);
        metrics::histogram!("analysis_processing_seconds").record(elapsed);

        match state.store.get(task.job_id).await? {
            Some(job) => {
                let report = state
                    .pipeline
                    .aggregate(&ReportHeader::for_job(&job), &job.stage_outputs);
                if let Err(e) = state.storage.write_report(job.id, &report).await {
                    tracing::warn!(job_id = %job.id, error = %e, "Could not write report file");
                }
            }
            None => tracing::warn!(job_id = %task.job_id, "Job deleted before its report was written"),
        }

        tracing::info!(
            job_id = %task.job_id,
            processing_time = elapsed,
            attempt = task.attempt,
            "Analysis completed"
        );
    } else {
        tracing::info!(job_id = %task.job_id, "Job finished elsewhere, result discarded");
    }

    discard_artifact(state, task).await;
    state.queue.ack(task).await?;
    Ok(())
}

async fn finish_failure(
    state: &AppState,
    task: &AnalysisTask,
    err: TaskError,
    elapsed: f64,
) -> Result<(), TaskError> {
    let kind = err.kind();
    let policy = state.settings.retry;

    if policy.should_retry(task.attempt, kind) {
        let next = task.next_attempt();
        let delay = policy.backoff(next.attempt);
        state.queue.retry(&next, delay).await?;
        state.queue.ack(task).await?;

        metrics::counter!("analysis_jobs_retried").increment(1);
        tracing::warn!(
            job_id = %task.job_id,
            attempt = task.attempt + 1,
            max_attempts = policy.max_attempts(),
            retry_in_secs = delay.as_secs(),
            error = %err,
            "Attempt failed, retry scheduled"
        );
        return Ok(());
    }

    let completed = match &err {
        TaskError::Pipeline(failure) => failure.completed.clone(),
        _ => StageOutputs::new(),
    };
    state
        .store
        .update_terminal(
            task.job_id,
            TerminalUpdate::failed(completed, err.to_string(), elapsed),
        )
        .await?;

    metrics::counter!("analysis_jobs_failed").increment(1);
    tracing::error!(
        job_id = %task.job_id,
        attempt = task.attempt + 1,
        max_attempts = policy.max_attempts(),
        kind = ?kind,
        error = %err,
        "Analysis failed"
    );

    discard_artifact(state, task).await;
    state.queue.ack(task).await?;
    Ok(())
}

async fn discard_artifact(state: &AppState, task: &AnalysisTask) {
    if let Err(e) = state.storage.remove(&task.artifact_locator).await {
        tracing::warn!(job_id = %task.job_id, error = %e, "Could not remove staged artifact");
    }
}

/// Poll loop run by each worker task until `shutdown` flips to true.
pub async fn run_worker(
    state: AppState,
    worker_id: usize,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(worker_id, "Worker ready, starting task processing loop");

    while !*shutdown.borrow() {
        let idle = match process_next_task(&state).await {
            Ok(true) => false,
            Ok(false) => true,
            Err(e) => {
                tracing::error!(worker_id, error = %e, "Error processing task, will retry");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    tracing::info!(worker_id, "Worker stopped");
}

/// Periodically returns expired leases to the ready queue.
pub async fn run_reclaimer(state: AppState, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        match state.queue.reclaim_expired().await {
            Ok(0) => {}
            Ok(count) => tracing::warn!(count, "Reclaimed tasks with expired leases"),
            Err(e) => tracing::error!(error = %e, "Lease reclaim failed"),
        }
        if let Ok(stats) = state.queue.stats().await {
            metrics::gauge!("analysis_queue_depth").set(stats.ready as f64);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("staged artifact not found: {0}")]
    ArtifactMissing(String),

    #[error(transparent)]
    Storage(StorageError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Pipeline(PipelineFailure),

    #[error("hard time limit of {}s exceeded", .0.as_secs())]
    HardTimeLimit(Duration),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl TaskError {
    /// Whether another attempt of the same task could succeed.
    pub fn kind(&self) -> FailureKind {
        match self {
            TaskError::Pipeline(_) | TaskError::HardTimeLimit(_) => FailureKind::Retryable,
            TaskError::Storage(StorageError::Io(_)) => FailureKind::Retryable,
            TaskError::Store(_) | TaskError::Queue(_) => FailureKind::Retryable,
            TaskError::ArtifactMissing(_) | TaskError::Storage(_) | TaskError::Extraction(_) => {
                FailureKind::Fatal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageError;

    #[test]
    fn test_failure_classification() {
        let stage_failure = TaskError::Pipeline(PipelineFailure {
            stage: "clinical_analysis".to_string(),
            source: StageError::Processor("timeout".to_string()),
            completed: StageOutputs::new(),
        });
        assert_eq!(stage_failure.kind(), FailureKind::Retryable);
        assert_eq!(
            TaskError::HardTimeLimit(Duration::from_secs(900)).kind(),
            FailureKind::Retryable
        );
        assert_eq!(
            TaskError::ArtifactMissing("lab_report_x.pdf.enc".into()).kind(),
            FailureKind::Fatal
        );
        assert_eq!(
            TaskError::Extraction(ExtractionError::NoText).kind(),
            FailureKind::Fatal
        );
        assert_eq!(
            TaskError::Storage(StorageError::InvalidLocator("../x".into())).kind(),
            FailureKind::Fatal
        );
    }

    #[test]
    fn test_failure_messages() {
        assert_eq!(
            TaskError::HardTimeLimit(Duration::from_secs(900)).to_string(),
            "hard time limit of 900s exceeded"
        );
        let failure = TaskError::Pipeline(PipelineFailure {
            stage: "verification".to_string(),
            source: StageError::Interrupted,
            completed: StageOutputs::new(),
        });
        assert_eq!(
            failure.to_string(),
            "stage 'verification' failed: interrupted after the soft time limit"
        );
    }
}
