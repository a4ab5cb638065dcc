use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use elastic_log_writer::apm::{ApmAgent, CaptureMetadata, TraceIds};
use elastic_log_writer::config::WriterConfig;
use elastic_log_writer::error_shape::LoggedError;
use elastic_log_writer::identity::Identity;
use elastic_log_writer::layer::ElasticLayer;
use elastic_log_writer::level::LogLevel;
use elastic_log_writer::serializer::SafeSerializer;
use elastic_log_writer::sink::{BulkRequest, LogSink, SinkError};
use elastic_log_writer::writer::{ElasticWriter, Writer};
use serde_json::{json, Value};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

#[derive(Default)]
struct RecordingSink {
    requests: Mutex<Vec<BulkRequest>>,
    fail: bool,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingSink {
    fn failing() -> Self {
        RecordingSink {
            fail: true,
            ..Default::default()
        }
    }

    fn batch_sizes(&self) -> Vec<usize> {
        self.requests.lock().unwrap().iter().map(BulkRequest::len).collect()
    }

    fn bodies(&self) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .flat_map(|r| r.documents().map(|d| serde_json::to_value(d).unwrap()).collect::<Vec<_>>())
            .collect()
    }
}

#[async_trait]
impl LogSink for RecordingSink {
    async fn bulk(&self, request: &BulkRequest) -> Result<(), SinkError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.requests.lock().unwrap().push(request.clone());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(SinkError::Request("connection refused".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingApm {
    captured: Mutex<Vec<(LoggedError, CaptureMetadata)>>,
}

impl ApmAgent for RecordingApm {
    fn capture_error(&self, error: &LoggedError, metadata: CaptureMetadata) {
        self.captured.lock().unwrap().push((error.clone(), metadata));
    }

    fn service_name(&self) -> Option<String> {
        Some("checkout".to_string())
    }

    fn current_trace_ids(&self) -> TraceIds {
        TraceIds {
            trace_id: Some("t-1".to_string()),
            transaction_id: None,
            span_id: Some("s-1".to_string()),
        }
    }
}

fn identity() -> Identity {
    Identity::new("web-1", 99, Some("test".to_string()))
}

#[tokio::test(start_paused = true)]
async fn records_are_batched_in_order_with_bounded_concurrency() {
    let sink = Arc::new(RecordingSink::default());
    let writer = ElasticWriter::builder()
        .sink(sink.clone())
        .identity(identity())
        .config(WriterConfig::default().with_index("logs-orders"))
        .build()
        .unwrap();

    for i in 0..250 {
        writer.log("orders:sync", LogLevel::Info, &format!("record {}", i), None, Some(&json!({ "n": i })));
    }
    writer.flush().await;

    let mut sizes = sink.batch_sizes();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![50, 100, 100]);
    assert!(sink.peak.load(Ordering::SeqCst) <= 2);

    let mut numbers: Vec<i64> = sink
        .bodies()
        .iter()
        .map(|doc| doc["context"]["n"].as_i64().unwrap())
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, (0..250).collect::<Vec<_>>());

    assert!(sink.requests.lock().unwrap().iter().all(|r| r.index == "logs-orders"));
    assert_eq!(writer.delivery_stats().stored_records(), 250);
}

#[tokio::test(start_paused = true)]
async fn store_documents_carry_identity_and_trace_ids() {
    let sink = Arc::new(RecordingSink::default());
    let apm = Arc::new(RecordingApm::default());
    let writer = ElasticWriter::builder()
        .sink(sink.clone())
        .apm(apm.clone())
        .identity(identity())
        .build()
        .unwrap();

    writer.write("shop:api", LogLevel::Warn, "slow upstream", None, None);
    writer.flush().await;

    let docs = sink.bodies();
    assert_eq!(docs.len(), 1);
    let doc = &docs[0];
    assert_eq!(doc["scope"], "shop:api");
    assert_eq!(doc["log"]["level"], "warn");
    assert_eq!(doc["service"]["name"], "checkout");
    assert_eq!(doc["service"]["environment"], "test");
    assert_eq!(doc["host"]["hostname"], "web-1");
    assert_eq!(doc["process"]["pid"], 99);
    assert_eq!(doc["trace"]["id"], "t-1");
    assert_eq!(doc["span"]["id"], "s-1");
    assert!(doc.get("transaction").is_none());
    assert!(doc["@timestamp"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test(start_paused = true)]
async fn errors_go_to_apm_instead_of_the_store() {
    let sink = Arc::new(RecordingSink::default());
    let apm = Arc::new(RecordingApm::default());
    let writer = ElasticWriter::builder()
        .sink(sink.clone())
        .apm(apm.clone())
        .identity(identity())
        .build()
        .unwrap();

    let error = LoggedError::new("card declined");
    writer.log(
        "shop:payments",
        LogLevel::Error,
        "charge failed",
        Some(&error),
        Some(&json!({ "req": {}, "amount": 10 })),
    );
    writer.flush().await;

    assert_eq!(writer.queue_stats().pushed(), 0);
    assert!(sink.requests.lock().unwrap().is_empty());

    let captured = apm.captured.lock().unwrap();
    assert_eq!(captured.len(), 1);
    let custom = captured[0].1.custom.as_ref().unwrap();
    assert_eq!(custom.scope, "shop:payments");
    assert_eq!(custom.context, Some(json!({ "amount": 10 })));
}

#[tokio::test(start_paused = true)]
async fn failed_batch_is_reported_to_apm_once() {
    let sink = Arc::new(RecordingSink::failing());
    let apm = Arc::new(RecordingApm::default());
    let writer = ElasticWriter::builder()
        .sink(sink.clone())
        .apm(apm.clone())
        .identity(identity())
        .config(WriterConfig::default().with_retries(2, Duration::from_millis(5)))
        .build()
        .unwrap();

    writer.write("app", LogLevel::Info, "will be lost", None, None);
    writer.flush().await;

    assert_eq!(sink.requests.lock().unwrap().len(), 3);
    assert_eq!(writer.delivery_stats().lost_records(), 1);

    let captured = apm.captured.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert!(captured[0].0.message().contains("connection refused"));
    assert!(captured[0].1.custom.is_none());
    assert!(captured[0].1.handled);
}

#[tokio::test(start_paused = true)]
async fn partial_batch_is_sent_after_max_wait() {
    let sink = Arc::new(RecordingSink::default());
    let writer = ElasticWriter::builder()
        .sink(sink.clone())
        .identity(identity())
        .config(WriterConfig::default().with_max_wait(Duration::from_millis(200)))
        .build()
        .unwrap();

    writer.write("app", LogLevel::Info, "lonely", None, None);
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(sink.batch_sizes(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn long_strings_are_truncated_on_the_wire() {
    let sink = Arc::new(RecordingSink::default());
    let writer = ElasticWriter::builder()
        .sink(sink.clone())
        .identity(identity())
        .build()
        .unwrap();

    let dump = "x".repeat(10_000);
    writer.log("app", LogLevel::Debug, "dump", None, Some(&json!({ "dump": dump })));
    writer.write("app", LogLevel::Info, "dump", None, Some(&json!({ "dump": dump })));
    writer.flush().await;

    // Debug is below the default level.
    let requests = sink.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].len(), 1);

    let body = requests[0].to_ndjson(&SafeSerializer::new());
    let doc: Value = serde_json::from_str(body.lines().nth(1).unwrap()).unwrap();
    let shipped = doc["context"]["dump"].as_str().unwrap();
    assert!(shipped.len() < 5000);
    assert!(shipped.contains("truncated 5904 characters"));
}

#[tokio::test(start_paused = true)]
async fn tracing_events_reach_the_store() {
    let sink = Arc::new(RecordingSink::default());
    let writer = Arc::new(
        ElasticWriter::builder()
            .sink(sink.clone())
            .identity(identity())
            .build()
            .unwrap(),
    );

    let subscriber = Registry::default().with(ElasticLayer::new(writer.clone()));
    tracing::subscriber::with_default(subscriber, || {
        tracing::info!(target: "billing:invoices", invoice = 12, "invoice sent");
        tracing::warn!(target: "elastic_log_writer::flusher", "not shipped");
    });
    writer.flush().await;

    let docs = sink.bodies();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["scope"], "billing:invoices");
    assert_eq!(docs[0]["message"], "invoice sent");
    assert_eq!(docs[0]["service"]["name"], "billing");
    assert_eq!(docs[0]["context"], json!({ "invoice": 12 }));
}

#[tokio::test(start_paused = true)]
async fn shutdown_sends_the_partial_batch() {
    let sink = Arc::new(RecordingSink::default());
    let writer = ElasticWriter::builder()
        .sink(sink.clone())
        .identity(identity())
        .build()
        .unwrap();

    for i in 0..3 {
        writer.write("app", LogLevel::Info, &format!("closing {}", i), None, None);
    }
    writer.shutdown().await;

    assert_eq!(sink.batch_sizes(), vec![3]);
    let messages: Vec<Value> = sink.bodies().iter().map(|doc| doc["message"].clone()).collect();
    assert_eq!(messages, vec![json!("closing 0"), json!("closing 1"), json!("closing 2")]);
}
