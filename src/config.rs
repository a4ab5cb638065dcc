use crate::backend::{BackendBuildError, DsnError};
use crate::env::{
    env_opt, env_parse, APP_ENV, LOG_BATCH_SIZE_ENV, LOG_CONCURRENCY_ENV, LOG_ENVIRONMENT_ENV,
    LOG_INDEX_ENV, LOG_LEVEL_ENV, LOG_TIMEOUT_MS_ENV,
};
use crate::level::LogLevel;
use crate::queue::QueueConfig;
use std::time::Duration;

pub const DEFAULT_INDEX: &str = "logs-logger-default";

/// Configuration of an [`ElasticWriter`](crate::writer::ElasticWriter).
///
/// **Fields**
/// - `index`: target index or data stream.
/// - `batch_size`: records per bulk request.
/// - `concurrency`: bulk requests allowed in flight at once.
/// - `timeout`: per-request timeout handed to the store sink.
/// - `max_wait`: longest time a partial batch waits before it is flushed.
/// - `retries`: extra attempts for a failed bulk request before the batch
///   is dropped, with `retry_backoff` doubling between attempts.
/// - `level`: calls below this level are ignored.
/// - `environment`: deployment environment stamped as `service.environment`.
#[derive(Clone, Debug, PartialEq)]
pub struct WriterConfig {
    pub index: String,
    pub batch_size: usize,
    pub concurrency: usize,
    pub timeout: Duration,
    pub max_wait: Duration,
    pub retries: u32,
    pub retry_backoff: Duration,
    pub level: LogLevel,
    pub environment: Option<String>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            index: DEFAULT_INDEX.to_string(),
            batch_size: 100,
            concurrency: 2,
            timeout: Duration::from_millis(4000),
            max_wait: Duration::from_secs(1),
            retries: 2,
            retry_backoff: Duration::from_millis(100),
            level: LogLevel::Info,
            environment: None,
        }
    }
}

impl WriterConfig {
    /// Defaults overridden by any `ELASTIC_LOG_*` variables that are set.
    /// Unparsable values are ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            index: env_opt(LOG_INDEX_ENV).unwrap_or(defaults.index),
            batch_size: env_parse(LOG_BATCH_SIZE_ENV).unwrap_or(defaults.batch_size),
            concurrency: env_parse(LOG_CONCURRENCY_ENV).unwrap_or(defaults.concurrency),
            timeout: env_parse(LOG_TIMEOUT_MS_ENV)
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            level: env_parse(LOG_LEVEL_ENV).unwrap_or(defaults.level),
            environment: env_opt(LOG_ENVIRONMENT_ENV).or_else(|| env_opt(APP_ENV)),
            ..defaults
        }
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index.trim().is_empty() {
            return Err(ConfigError::EmptyIndex);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            max_wait: self.max_wait,
        }
    }
}

/// Error returned when a writer cannot be constructed.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("a store sink is required")]
    MissingSink,

    #[error("index name must not be empty")]
    EmptyIndex,

    #[error("batch size must be at least 1")]
    ZeroBatchSize,

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("the writer must be built inside a Tokio runtime")]
    NoRuntime,

    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,

    #[error(transparent)]
    Dsn(#[from] DsnError),

    #[error(transparent)]
    Backend(#[from] BackendBuildError),
}
