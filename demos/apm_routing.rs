use std::sync::Arc;

use elastic_log_writer::{
    apm::{ApmAgent, CaptureMetadata, TraceIds},
    error_shape::LoggedError,
    level::LogLevel,
    noop_sink::NoopSink,
    writer::ElasticWriter,
};
use serde_json::json;

/// Stand-in for a real APM agent: prints what it would report.
struct PrintingAgent;

impl ApmAgent for PrintingAgent {
    fn capture_error(&self, error: &LoggedError, metadata: CaptureMetadata) {
        let custom = metadata
            .custom
            .map(|c| serde_json::to_string(&c).unwrap_or_default())
            .unwrap_or_default();
        println!("[apm] {} handled={} {}", error, metadata.handled, custom);
    }

    fn service_name(&self) -> Option<String> {
        Some("checkout".to_string())
    }

    fn current_trace_ids(&self) -> TraceIds {
        TraceIds {
            trace_id: Some("0af7651916cd43dd8448eb211c80319c".to_string()),
            transaction_id: Some("b7ad6b7169203331".to_string()),
            span_id: None,
        }
    }
}

#[tokio::main]
async fn main() {
    let writer = ElasticWriter::builder()
        .sink(Arc::new(NoopSink))
        .apm(Arc::new(PrintingAgent))
        .build()
        .expect("build writer");

    let error = LoggedError::new("card declined").with_property("code", "CARD_DECLINED");

    // Goes to the store, tagged with the agent's trace ids.
    writer.log("shop:payments", LogLevel::Info, "charging card", None, Some(&json!({ "amount": 1200 })));
    // Goes to the APM agent only; request objects are left out.
    writer.log(
        "shop:payments",
        LogLevel::Error,
        "charge failed",
        Some(&error),
        Some(&json!({ "amount": 1200, "req": { "url": "/pay" }, "handled": false })),
    );

    writer.flush().await;
    println!(
        "pushed to store: {}, stored: {}",
        writer.queue_stats().pushed(),
        writer.delivery_stats().stored_records()
    );
    writer.shutdown().await;
}
