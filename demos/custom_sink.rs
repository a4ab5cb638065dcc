use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};
use elastic_log_writer::{
    init::init_tracing,
    serializer::SafeSerializer,
    sink::{BulkRequest, LogSink, SinkError},
};

/// Example of integrating a custom store by implementing the `LogSink`
/// trait directly. This one prints every bulk body to stdout.
struct StdoutBulkSink {
    serializer: SafeSerializer,
}

#[async_trait]
impl LogSink for StdoutBulkSink {
    async fn bulk(&self, request: &BulkRequest) -> Result<(), SinkError> {
        println!("[{}] {} documents", request.index, request.len());
        print!("{}", request.to_ndjson(&self.serializer));
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let sink: Arc<dyn LogSink> = Arc::new(StdoutBulkSink {
        serializer: SafeSerializer::new(),
    });

    let writer = init_tracing(sink).expect("install subscriber");

    info!(target: "demo:custom", "custom sink example started");
    error!(target: "demo:custom", db = "my-custom-db", "simulated error without an APM agent");

    writer.flush().await;
}
