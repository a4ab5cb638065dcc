use crate::apm::{ApmAgent, CaptureMetadata};
use crate::error_shape::LoggedError;
use crate::queue::BatchHandler;
use crate::record::LogRecord;
use crate::serializer::SafeSerializer;
use crate::sink::{BulkRequest, LogSink, SinkError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, warn};

const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Outcome counters of bulk writes.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    stored_batches: AtomicU64,
    stored_records: AtomicU64,
    failed_batches: AtomicU64,
    lost_records: AtomicU64,
    attempts: AtomicU64,
}

impl DeliveryStats {
    pub fn stored_batches(&self) -> u64 {
        self.stored_batches.load(Ordering::Relaxed)
    }

    pub fn stored_records(&self) -> u64 {
        self.stored_records.load(Ordering::Relaxed)
    }

    /// Batches dropped after the retry budget ran out.
    pub fn failed_batches(&self) -> u64 {
        self.failed_batches.load(Ordering::Relaxed)
    }

    pub fn lost_records(&self) -> u64 {
        self.lost_records.load(Ordering::Relaxed)
    }

    /// Calls made to the sink, retries included.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}

/// Batch handler that writes records to a [`LogSink`] as one bulk request.
///
/// A failing request is retried `retries` more times with doubling backoff.
/// After that the batch is dropped: the failure is logged together with the
/// lost documents and, when an APM agent is configured, captured there.
pub struct BulkFlusher {
    sink: Arc<dyn LogSink>,
    index: String,
    apm: Option<Arc<dyn ApmAgent>>,
    retries: u32,
    retry_backoff: Duration,
    serializer: SafeSerializer,
    stats: Arc<DeliveryStats>,
}

impl BulkFlusher {
    pub fn new(sink: Arc<dyn LogSink>, index: impl Into<String>) -> Self {
        BulkFlusher {
            sink,
            index: index.into(),
            apm: None,
            retries: 2,
            retry_backoff: Duration::from_millis(100),
            serializer: SafeSerializer::new(),
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    pub fn with_apm(mut self, apm: Option<Arc<dyn ApmAgent>>) -> Self {
        self.apm = apm;
        self
    }

    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn stats(&self) -> Arc<DeliveryStats> {
        Arc::clone(&self.stats)
    }

    async fn send(&self, request: &BulkRequest) -> Result<(), SinkError> {
        let mut backoff = self.retry_backoff;
        let mut attempt = 0;

        loop {
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);
            match self.sink.bulk(request).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(error = %e, attempt, "bulk write failed, retrying in {:?}", backoff);
                    sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, MAX_RETRY_BACKOFF);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn report_lost(&self, request: &BulkRequest, e: &SinkError) {
        self.stats.failed_batches.fetch_add(1, Ordering::Relaxed);
        self.stats
            .lost_records
            .fetch_add(request.len() as u64, Ordering::Relaxed);

        error!(
            error = %e,
            index = %request.index,
            documents = request.len(),
            body = %request.to_ndjson(&self.serializer),
            "failed to store logs, dropping batch"
        );

        if let Some(apm) = &self.apm {
            apm.capture_error(
                &LoggedError::from_error(e),
                CaptureMetadata {
                    custom: None,
                    handled: true,
                },
            );
        }
    }
}

#[async_trait]
impl BatchHandler<LogRecord> for BulkFlusher {
    async fn handle(&self, batch: Vec<LogRecord>) {
        if batch.is_empty() {
            return;
        }

        let request = BulkRequest::create(self.index.clone(), batch);
        match self.send(&request).await {
            Ok(()) => {
                self.stats.stored_batches.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .stored_records
                    .fetch_add(request.len() as u64, Ordering::Relaxed);
                debug!(index = %request.index, documents = request.len(), "stored log batch");
            }
            Err(e) => self.report_lost(&request, &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LogLevel;
    use crate::record::{HostInfo, LogMeta, ProcessInfo, ServiceInfo};
    use crate::sink::BulkAction;
    use chrono::DateTime;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    struct FlakySink {
        failures: AtomicU32,
        requests: Mutex<Vec<BulkRequest>>,
    }

    impl FlakySink {
        fn failing(times: u32) -> Arc<Self> {
            Arc::new(FlakySink {
                failures: AtomicU32::new(times),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LogSink for FlakySink {
        async fn bulk(&self, request: &BulkRequest) -> Result<(), SinkError> {
            self.requests.lock().unwrap().push(request.clone());
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(SinkError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingApm {
        captured: Mutex<Vec<(LoggedError, CaptureMetadata)>>,
    }

    impl ApmAgent for CountingApm {
        fn capture_error(&self, error: &LoggedError, metadata: CaptureMetadata) {
            self.captured.lock().unwrap().push((error.clone(), metadata));
        }
    }

    fn record(message: &str) -> LogRecord {
        LogRecord {
            scope: "app".to_string(),
            log: LogMeta { level: LogLevel::Info },
            message: message.to_string(),
            error: None,
            context: None,
            host: HostInfo::new("h"),
            service: ServiceInfo {
                name: "app".to_string(),
                environment: None,
            },
            process: ProcessInfo { pid: 1 },
            timestamp: DateTime::from_timestamp(0, 0).unwrap(),
            trace: None,
            transaction: None,
            span: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_within_retry_budget() {
        let sink = FlakySink::failing(2);
        let flusher = BulkFlusher::new(sink.clone(), "logs-app");
        let stats = flusher.stats();

        flusher.handle(vec![record("a"), record("b")]).await;

        let requests = sink.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].index, "logs-app");
        assert!(requests[0]
            .operations
            .iter()
            .all(|op| op.action == BulkAction::Create));
        let messages: Vec<_> = requests[2].documents().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["a", "b"]);

        assert_eq!(stats.stored_records(), 2);
        assert_eq!(stats.failed_batches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_batch_is_reported_once_and_dropped() {
        let sink = FlakySink::failing(u32::MAX);
        let apm = Arc::new(CountingApm::default());
        let flusher = BulkFlusher::new(sink.clone(), "logs-app")
            .with_apm(Some(apm.clone() as Arc<dyn ApmAgent>))
            .with_retries(2, Duration::from_millis(10));
        let stats = flusher.stats();

        flusher.handle(vec![record("lost")]).await;

        assert_eq!(sink.requests.lock().unwrap().len(), 3);
        assert_eq!(stats.attempts(), 3);
        assert_eq!(stats.failed_batches(), 1);
        assert_eq!(stats.lost_records(), 1);

        let captured = apm.captured.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert!(captured[0].0.message().contains("503"));
        assert!(captured[0].1.custom.is_none());
    }

    #[tokio::test]
    async fn empty_batches_are_skipped() {
        let sink = FlakySink::failing(0);
        let flusher = BulkFlusher::new(sink.clone(), "logs-app");

        flusher.handle(Vec::new()).await;

        assert!(sink.requests.lock().unwrap().is_empty());
    }
}
