use std::sync::Arc;
use std::time::Duration;

use crate::config::{AnalysisSettings, AppConfig};
use crate::db::{self, queries::PgJobStore};
use crate::pipeline::{default_stages, executor::PipelineConfigError, PipelineExecutor};
use crate::services::{
    analysis::AnalysisService,
    encryption::{ArtifactCipher, CipherError},
    extraction::{PdfTextExtractor, TextExtractor},
    llm::{LlmError, WorkersAiClient},
    queue::{QueueError, RedisTaskQueue, TaskQueue},
    storage::ArtifactStorage,
    store::JobStore,
};

/// Shared state passed to route handlers and workers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub storage: Arc<ArtifactStorage>,
    pub extractor: Arc<dyn TextExtractor>,
    pub pipeline: Arc<PipelineExecutor>,
    pub settings: Arc<AnalysisSettings>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn TaskQueue>,
        storage: ArtifactStorage,
        extractor: Arc<dyn TextExtractor>,
        pipeline: PipelineExecutor,
        settings: AnalysisSettings,
    ) -> Self {
        Self {
            store,
            queue,
            storage: Arc::new(storage),
            extractor,
            pipeline: Arc::new(pipeline),
            settings: Arc::new(settings),
        }
    }

    pub fn analyses(&self) -> AnalysisService<'_> {
        AnalysisService::new(self)
    }
}

/// Connects every backend named in `config` and assembles the shared state.
pub async fn build_state(config: &AppConfig) -> Result<AppState, StartupError> {
    tracing::info!("Connecting to PostgreSQL database");
    let pool = db::init_pool(&config.database_url, config.database_max_connections).await?;

    tracing::info!("Running database migrations");
    db::run_migrations(&pool).await?;

    tracing::info!("Connecting to Redis task queue");
    let queue = RedisTaskQueue::new(
        &config.redis_url,
        Duration::from_secs(config.visibility_timeout_secs),
    )?;

    tracing::info!("Initializing AES-256-GCM encryption for staged uploads");
    let cipher = ArtifactCipher::from_base64(&config.encryption_key)?;
    let storage = ArtifactStorage::new(
        config.staging_dir.clone(),
        config.reports_dir.clone(),
        cipher,
    );

    tracing::info!(model = %config.cf_model, "Initializing Cloudflare Workers AI client");
    let generator =
        WorkersAiClient::new(&config.cf_account_id, &config.cf_api_token, &config.cf_model)?;
    let pipeline = PipelineExecutor::new(default_stages(Arc::new(generator)))?;

    Ok(AppState::new(
        Arc::new(PgJobStore::new(pool)),
        Arc::new(queue),
        storage,
        Arc::new(PdfTextExtractor::new()),
        pipeline,
        config.analysis_settings(),
    ))
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("database setup failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("task queue setup failed: {0}")]
    Queue(#[from] QueueError),

    #[error("encryption setup failed: {0}")]
    Encryption(#[from] CipherError),

    #[error("Workers AI client setup failed: {0}")]
    Llm(#[from] LlmError),

    #[error("invalid pipeline: {0}")]
    Pipeline(#[from] PipelineConfigError),
}
