use crate::record::LogRecord;
use crate::serializer::SafeSerializer;
use async_trait::async_trait;
use serde::Serialize;

/// Bulk directive paired with each document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    Create,
    Index,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkOperation {
    pub action: BulkAction,
    pub document: LogRecord,
}

/// One batched indexing request: a directive/document pair per record, in
/// push order.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkRequest {
    pub index: String,
    pub operations: Vec<BulkOperation>,
}

impl BulkRequest {
    /// A request with a `create` directive for every record.
    pub fn create(index: impl Into<String>, records: Vec<LogRecord>) -> Self {
        BulkRequest {
            index: index.into(),
            operations: records
                .into_iter()
                .map(|document| BulkOperation {
                    action: BulkAction::Create,
                    document,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn documents(&self) -> impl Iterator<Item = &LogRecord> {
        self.operations.iter().map(|op| &op.document)
    }

    /// Newline-delimited body for the `_bulk` endpoint. The target index is
    /// carried in the URL, so directives are empty objects.
    pub fn to_ndjson(&self, serializer: &SafeSerializer) -> String {
        let mut body = String::new();
        for op in &self.operations {
            body.push_str("{\"");
            body.push_str(match op.action {
                BulkAction::Create => "create",
                BulkAction::Index => "index",
            });
            body.push_str("\":{}}\n");
            body.push_str(&serializer.serialize(&op.document));
            body.push('\n');
        }
        body
    }
}

/// Error returned by a [`LogSink`] when a bulk request could not be stored.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("request to store failed: {0}")]
    Request(String),

    #[error("store responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Other(String),
}

/// Asynchronous search store receiving batched [`LogRecord`]s.
///
/// Implementations transport one [`BulkRequest`] per call and may retry
/// transient failures on their own. The writer calls `bulk` from background
/// tasks and never awaits it on the application thread.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Store every document of `request`.
    ///
    /// **Returns**
    /// - `Ok(())` if the store accepted the request.
    /// - `Err(..)` if the store failed (network error, HTTP status, etc.).
    ///   The writer retries the batch a bounded number of times, then drops
    ///   it.
    async fn bulk(&self, request: &BulkRequest) -> Result<(), SinkError>;
}
