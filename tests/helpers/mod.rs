//! In-process harness: in-memory store and queue, a temp staging area and
//! scripted pipeline stages.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use lab_report_analyzer::{
    app_state::AppState,
    config::{AnalysisSettings, TimeLimits},
    models::analysis::SubmitRequest,
    models::job::AnalysisJob,
    pipeline::{PipelineExecutor, StageDescriptor, StageError, StageInput, StageProcessor},
    services::{
        encryption::ArtifactCipher,
        extraction::{ExtractionError, TextExtractor},
        memory_queue::InMemoryTaskQueue,
        memory_store::InMemoryJobStore,
        retry::RetryPolicy,
        storage::ArtifactStorage,
        store::JobStore,
        worker,
    },
};
use uuid::Uuid;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Treats everything after the PDF magic as the document text.
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    fn supports(&self, data: &[u8]) -> bool {
        data.starts_with(PDF_MAGIC)
    }

    async fn extract_text(&self, data: &[u8]) -> Result<String, ExtractionError> {
        let text = String::from_utf8_lossy(&data[PDF_MAGIC.len()..])
            .trim()
            .to_string();
        if text.is_empty() {
            return Err(ExtractionError::NoText);
        }
        Ok(text)
    }
}

/// A stage with a fixed reply, an optional delay and a call counter.
pub struct ScriptedStage {
    reply: Result<String, String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedStage {
    pub fn ok(reply: &str) -> Arc<Self> {
        Self::build(Ok(reply.to_string()), Duration::ZERO)
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::build(Err(message.to_string()), Duration::ZERO)
    }

    pub fn slow(reply: &str, delay: Duration) -> Arc<Self> {
        Self::build(Ok(reply.to_string()), delay)
    }

    fn build(reply: Result<String, String>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply,
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageProcessor for ScriptedStage {
    async fn process(&self, _input: StageInput<'_>) -> Result<String, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone().map_err(StageError::Processor)
    }
}

pub fn stage(name: &str, processor: &Arc<ScriptedStage>) -> StageDescriptor {
    StageDescriptor::new(name, name.to_uppercase(), processor.clone())
}

/// Fast settings: immediate retries and short time limits.
pub fn test_settings() -> AnalysisSettings {
    AnalysisSettings {
        retry: RetryPolicy::new(3, Duration::ZERO),
        limits: TimeLimits {
            soft: Duration::from_secs(5),
            hard: Duration::from_secs(10),
        },
        ..AnalysisSettings::default()
    }
}

pub fn pdf(text: &str) -> Vec<u8> {
    format!("%PDF-1.4\n{text}").into_bytes()
}

pub fn upload(filename: &str) -> SubmitRequest {
    SubmitRequest {
        filename: Some(filename.to_string()),
        ..SubmitRequest::default()
    }
}

pub struct Harness {
    pub state: AppState,
    pub store: Arc<InMemoryJobStore>,
    pub queue: Arc<InMemoryTaskQueue>,
    pub staging_dir: PathBuf,
    _dir: TempDir,
}

impl Harness {
    pub fn new(stages: Vec<StageDescriptor>) -> Self {
        Self::with_settings(stages, test_settings())
    }

    pub fn with_settings(stages: Vec<StageDescriptor>, settings: AnalysisSettings) -> Self {
        Self::build(stages, settings, Duration::from_secs(960))
    }

    /// Leases expire immediately, as if every worker had crashed.
    pub fn with_expiring_leases(stages: Vec<StageDescriptor>) -> Self {
        Self::build(stages, test_settings(), Duration::ZERO)
    }

    fn build(
        stages: Vec<StageDescriptor>,
        settings: AnalysisSettings,
        visibility_timeout: Duration,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let staging_dir = dir.path().join("staging");
        let cipher = ArtifactCipher::from_key_bytes(&[7u8; 32]).unwrap();
        let storage = ArtifactStorage::new(&staging_dir, dir.path().join("reports"), cipher);

        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryTaskQueue::new(visibility_timeout));
        let state = AppState::new(
            store.clone(),
            queue.clone(),
            storage,
            Arc::new(PlainTextExtractor),
            PipelineExecutor::new(stages).unwrap(),
            settings,
        );

        Self {
            state,
            store,
            queue,
            staging_dir,
            _dir: dir,
        }
    }

    /// Run the worker until the queue has nothing ready. Returns the number
    /// of deliveries handled.
    pub async fn drain(&self) -> usize {
        let mut handled = 0;
        while worker::process_next_task(&self.state).await.unwrap() {
            handled += 1;
        }
        handled
    }

    pub async fn job(&self, id: Uuid) -> AnalysisJob {
        self.state.store.get(id).await.unwrap().unwrap()
    }

    pub fn staged_files(&self) -> usize {
        match std::fs::read_dir(&self.staging_dir) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}
