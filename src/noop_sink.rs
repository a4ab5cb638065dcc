use crate::sink::{BulkRequest, LogSink, SinkError};
use async_trait::async_trait;

/// A sink that accepts and drops every bulk request.
///
/// Useful for measuring the overhead of the writer itself without any
/// external I/O, and for tests that don't care about persistence.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl LogSink for NoopSink {
    async fn bulk(&self, _request: &BulkRequest) -> Result<(), SinkError> {
        Ok(())
    }
}
