use crate::apm::ApmAgent;
use crate::builder::{Classification, RecordBuilder};
use crate::config::{ConfigError, WriterConfig};
use crate::error_shape::LoggedError;
use crate::flusher::{BulkFlusher, DeliveryStats};
use crate::identity::Identity;
use crate::level::LogLevel;
use crate::queue::{BatchQueue, QueueStats};
use crate::record::LogRecord;
use crate::seq_date::SeqDate;
use crate::sink::LogSink;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Destination for shaped log calls.
///
/// `write` must return promptly and must not fail; whatever happens to the
/// call afterwards is the writer's business.
pub trait Writer: Send + Sync {
    fn write(
        &self,
        scope: &str,
        level: LogLevel,
        message: &str,
        error: Option<&LoggedError>,
        context: Option<&Value>,
    );
}

/// Writer that batches records into an Elasticsearch-compatible store and
/// diverts error-level calls carrying an error to an APM agent.
///
/// Must be built inside a Tokio runtime: batches are flushed by background
/// tasks spawned on it.
pub struct ElasticWriter {
    level: LogLevel,
    builder: RecordBuilder,
    queue: BatchQueue<LogRecord>,
    delivery: Arc<DeliveryStats>,
    worker: JoinHandle<()>,
}

impl ElasticWriter {
    pub fn builder() -> ElasticWriterBuilder {
        ElasticWriterBuilder::default()
    }

    /// Like [`Writer::write`], with any serializable context.
    pub fn log<C: Serialize + ?Sized>(
        &self,
        scope: &str,
        level: LogLevel,
        message: &str,
        error: Option<&LoggedError>,
        context: Option<&C>,
    ) {
        if level < self.level {
            return;
        }

        match self.builder.build(scope, level, message, error, context) {
            Classification::RouteToApm(capture) => {
                if let Some(apm) = self.builder.apm() {
                    apm.set_tag("level", level.as_str());
                    apm.capture_error(&capture.error, capture.metadata);
                }
            }
            Classification::StoreRecord(record) => self.queue.push(record),
        }
    }

    /// Send everything written so far and wait for the store to answer.
    pub async fn flush(&self) {
        self.queue.flush().await;
    }

    /// Flush and stop the background task.
    pub async fn shutdown(self) {
        let ElasticWriter { queue, worker, .. } = self;
        drop(queue);
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "log writer task ended abnormally");
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn queue_stats(&self) -> &QueueStats {
        self.queue.stats()
    }

    pub fn delivery_stats(&self) -> &DeliveryStats {
        &self.delivery
    }
}

impl Writer for ElasticWriter {
    fn write(
        &self,
        scope: &str,
        level: LogLevel,
        message: &str,
        error: Option<&LoggedError>,
        context: Option<&Value>,
    ) {
        self.log(scope, level, message, error, context);
    }
}

/// Builder for [`ElasticWriter`]. A sink is required.
#[derive(Default)]
pub struct ElasticWriterBuilder {
    sink: Option<Arc<dyn LogSink>>,
    apm: Option<Arc<dyn ApmAgent>>,
    config: WriterConfig,
    identity: Option<Identity>,
    seq_date: Option<Arc<SeqDate>>,
}

impl ElasticWriterBuilder {
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn apm(mut self, apm: Arc<dyn ApmAgent>) -> Self {
        self.apm = Some(apm);
        self
    }

    pub fn config(mut self, config: WriterConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the detected host/process identity.
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Use a dedicated timestamp sequence instead of the process-wide one.
    pub fn seq_date(mut self, seq_date: Arc<SeqDate>) -> Self {
        self.seq_date = Some(seq_date);
        self
    }

    pub fn build(self) -> Result<ElasticWriter, ConfigError> {
        let sink = self.sink.ok_or(ConfigError::MissingSink)?;
        self.config.validate()?;
        tokio::runtime::Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        let config = self.config;
        let identity = self
            .identity
            .unwrap_or_else(|| Identity::detect(config.environment.clone()));

        let mut builder = RecordBuilder::new(identity, self.apm.clone());
        if let Some(seq_date) = self.seq_date {
            builder = builder.with_seq_date(seq_date);
        }

        let flusher = BulkFlusher::new(sink, config.index.clone())
            .with_apm(self.apm)
            .with_retries(config.retries, config.retry_backoff);
        let delivery = flusher.stats();

        let (queue, worker) = BatchQueue::<LogRecord>::new(config.queue_config(), Arc::new(flusher));

        Ok(ElasticWriter {
            level: config.level,
            builder,
            queue,
            delivery,
            worker,
        })
    }
}
