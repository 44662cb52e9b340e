use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::retry::RetryPolicy;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Upper bound on pooled PostgreSQL connections per process
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// Redis connection string for the task queue
    pub redis_url: String,

    /// Cloudflare account ID
    pub cf_account_id: String,

    /// Cloudflare Workers AI API token
    pub cf_api_token: String,

    /// Workers AI text generation model used by the analysis stages
    #[serde(default = "default_cf_model")]
    pub cf_model: String,

    /// AES-256-GCM encryption key for staged reports (base64-encoded, 32 bytes)
    pub encryption_key: String,

    /// Directory holding encrypted uploads until their job reaches a terminal state
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Directory receiving the aggregate report of each completed job
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    #[serde(default = "default_directive")]
    pub default_directive: String,

    #[serde(default = "default_dedup_window_hours")]
    pub dedup_window_hours: i64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    #[serde(default = "default_soft_time_limit_secs")]
    pub soft_time_limit_secs: u64,

    #[serde(default = "default_hard_time_limit_secs")]
    pub hard_time_limit_secs: u64,

    /// How long a dequeued task may stay unacknowledged before it is redelivered
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    #[serde(default = "default_retention_interval_secs")]
    pub retention_interval_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_cf_model() -> String {
    "@cf/meta/llama-3.1-8b-instruct".to_string()
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_directive() -> String {
    "Summarise my lab report".to_string()
}

fn default_dedup_window_hours() -> i64 {
    24
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_secs() -> u64 {
    60
}

fn default_soft_time_limit_secs() -> u64 {
    600
}

fn default_hard_time_limit_secs() -> u64 {
    900
}

fn default_visibility_timeout_secs() -> u64 {
    960
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_retention_days() -> i64 {
    30
}

fn default_retention_interval_secs() -> u64 {
    3600
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// A lease must outlive the longest possible attempt, or a task that is
    /// still running gets reclaimed and handed to a second worker.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.soft_time_limit_secs > self.hard_time_limit_secs {
            return Err(ConfigError::Invalid(format!(
                "SOFT_TIME_LIMIT_SECS ({}) exceeds HARD_TIME_LIMIT_SECS ({})",
                self.soft_time_limit_secs, self.hard_time_limit_secs
            )));
        }
        if self.visibility_timeout_secs <= self.hard_time_limit_secs {
            return Err(ConfigError::Invalid(format!(
                "VISIBILITY_TIMEOUT_SECS ({}) must be greater than HARD_TIME_LIMIT_SECS ({})",
                self.visibility_timeout_secs, self.hard_time_limit_secs
            )));
        }
        Ok(())
    }

    /// Runtime knobs shared by the submission path and the workers.
    pub fn analysis_settings(&self) -> AnalysisSettings {
        AnalysisSettings {
            max_upload_bytes: self.max_upload_bytes,
            default_directive: self.default_directive.clone(),
            dedup_window: chrono::Duration::hours(self.dedup_window_hours),
            retry: RetryPolicy::new(
                self.max_retries,
                Duration::from_secs(self.retry_backoff_secs),
            ),
            limits: TimeLimits {
                soft: Duration::from_secs(self.soft_time_limit_secs),
                hard: Duration::from_secs(self.hard_time_limit_secs),
            },
        }
    }
}

/// Two-tier execution ceiling for a single pipeline attempt.
#[derive(Debug, Clone, Copy)]
pub struct TimeLimits {
    /// Raises the cooperative interrupt checked between stages.
    pub soft: Duration,
    /// Drops the running attempt outright.
    pub hard: Duration,
}

#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub max_upload_bytes: usize,
    pub default_directive: String,
    pub dedup_window: chrono::Duration,
    pub retry: RetryPolicy,
    pub limits: TimeLimits,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            default_directive: default_directive(),
            dedup_window: chrono::Duration::hours(default_dedup_window_hours()),
            retry: RetryPolicy::default(),
            limits: TimeLimits {
                soft: Duration::from_secs(default_soft_time_limit_secs()),
                hard: Duration::from_secs(default_hard_time_limit_secs()),
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Env(#[from] envy::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
