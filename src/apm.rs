use crate::error_shape::LoggedError;
use serde::Serialize;
use serde_json::{Map, Value};

/// Correlation ids of the transaction currently active in the APM agent.
///
/// Each id is independent: a transaction may be active without a span.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceIds {
    pub trace_id: Option<String>,
    pub transaction_id: Option<String>,
    pub span_id: Option<String>,
}

/// Tags attached to an error routed to the APM agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApmTags {
    pub level: String,
}

/// Custom payload describing the log call an error came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApmCustom {
    pub scope: String,
    pub message: String,
    pub attributes: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub tags: ApmTags,
}

/// Metadata passed along with [`ApmAgent::capture_error`].
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureMetadata {
    /// Present for errors logged by the application, absent for errors the
    /// writer reports about itself.
    pub custom: Option<ApmCustom>,
    pub handled: bool,
}

/// Application performance monitoring agent that receives error-level log
/// calls instead of the search store.
///
/// Calls are fire-and-forget: implementations should hand the error to
/// their own reporting pipeline and return immediately.
pub trait ApmAgent: Send + Sync {
    fn capture_error(&self, error: &LoggedError, metadata: CaptureMetadata);

    /// Service name configured in the agent, preferred over the scope-derived
    /// name on store records.
    fn service_name(&self) -> Option<String> {
        None
    }

    /// Called with `("level", <level name>)` right before an error routed
    /// from a log call is captured.
    fn set_tag(&self, _key: &str, _value: &str) {}

    fn current_trace_ids(&self) -> TraceIds {
        TraceIds::default()
    }
}
