use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use elastic_log_writer::config::WriterConfig;
use elastic_log_writer::init::{init_tracing_with_config, LayerConfig};
use elastic_log_writer::noop_sink::NoopSink;

#[tokio::main]
async fn main() {
    let config = LayerConfig {
        writer: WriterConfig::default(),
        enable_stdout: false,
    };
    let writer = init_tracing_with_config(Arc::new(NoopSink), None, config)
        .expect("install subscriber");

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        info!(target: "load:default", iteration = i, "default load test event");
    }

    let elapsed = start.elapsed();
    println!("default config: wrote {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    writer.flush().await;
    println!(
        "stored {} records in {} batches",
        writer.delivery_stats().stored_records(),
        writer.delivery_stats().stored_batches()
    );
}
