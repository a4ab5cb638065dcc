use crate::apm::{ApmAgent, ApmCustom, ApmTags, CaptureMetadata};
use crate::error_shape::{get_error_properties, LoggedError};
use crate::identity::Identity;
use crate::level::LogLevel;
use crate::record::{HostInfo, IdRef, LogMeta, LogRecord, ProcessInfo, ServiceInfo};
use crate::seq_date::SeqDate;
use crate::serializer::SafeSerializer;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Context fields left out of APM payloads; the agent already captures the
/// request and response on its own.
pub const APM_OMITTED_FIELDS: [&str; 3] = ["ctx", "req", "res"];

/// Where a log call ends up.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Captured by the APM agent; nothing is written to the store.
    RouteToApm(ApmCapture),
    StoreRecord(LogRecord),
}

/// Arguments for [`ApmAgent::capture_error`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApmCapture {
    pub error: LoggedError,
    pub metadata: CaptureMetadata,
}

/// Turns a log call into a store document or an APM capture.
pub struct RecordBuilder {
    identity: Identity,
    apm: Option<Arc<dyn ApmAgent>>,
    seq_date: Arc<SeqDate>,
    serializer: SafeSerializer,
}

impl RecordBuilder {
    pub fn new(identity: Identity, apm: Option<Arc<dyn ApmAgent>>) -> Self {
        RecordBuilder {
            identity,
            apm,
            seq_date: SeqDate::shared(),
            // Strings are truncated once, when the bulk body is encoded.
            serializer: SafeSerializer::untruncated(),
        }
    }

    pub fn with_seq_date(mut self, seq_date: Arc<SeqDate>) -> Self {
        self.seq_date = seq_date;
        self
    }

    pub fn apm(&self) -> Option<&Arc<dyn ApmAgent>> {
        self.apm.as_ref()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn build<C: Serialize + ?Sized>(
        &self,
        scope: &str,
        level: LogLevel,
        message: &str,
        error: Option<&LoggedError>,
        context: Option<&C>,
    ) -> Classification {
        if let (Some(_), true, Some(error)) = (&self.apm, level.is_error(), error) {
            return Classification::RouteToApm(self.apm_capture(scope, level, message, error, context));
        }

        Classification::StoreRecord(self.store_record(scope, level, message, error, context))
    }

    fn apm_capture<C: Serialize + ?Sized>(
        &self,
        scope: &str,
        level: LogLevel,
        message: &str,
        error: &LoggedError,
        context: Option<&C>,
    ) -> ApmCapture {
        let context = context.map(|c| self.serializer.to_value_omitting(c, &APM_OMITTED_FIELDS));
        let handled = context
            .as_ref()
            .and_then(|c| c.get("handled"))
            .and_then(Value::as_bool)
            .unwrap_or(true);

        ApmCapture {
            error: error.clone(),
            metadata: CaptureMetadata {
                custom: Some(ApmCustom {
                    scope: scope.to_string(),
                    message: message.to_string(),
                    attributes: get_error_properties(Some(error)),
                    context,
                    tags: ApmTags {
                        level: level.as_str().to_string(),
                    },
                }),
                handled,
            },
        }
    }

    fn store_record<C: Serialize + ?Sized>(
        &self,
        scope: &str,
        level: LogLevel,
        message: &str,
        error: Option<&LoggedError>,
        context: Option<&C>,
    ) -> LogRecord {
        let service_name = self
            .apm
            .as_ref()
            .and_then(|apm| apm.service_name())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| scope_service(scope).to_string());

        let ids = self
            .apm
            .as_ref()
            .map(|apm| apm.current_trace_ids())
            .unwrap_or_default();

        LogRecord {
            scope: scope.to_string(),
            log: LogMeta { level },
            message: message.to_string(),
            error: error.map(LoggedError::shape),
            context: context.map(|c| self.serializer.to_value(c)),
            host: HostInfo::new(self.identity.hostname.clone()),
            service: ServiceInfo {
                name: service_name,
                environment: self.identity.environment.clone(),
            },
            process: ProcessInfo {
                pid: self.identity.pid,
            },
            timestamp: self.seq_date.now(),
            trace: ids.trace_id.map(IdRef::new),
            transaction: ids.transaction_id.map(IdRef::new),
            span: ids.span_id.map(IdRef::new),
        }
    }
}

/// First `:`-delimited segment of a scope.
fn scope_service(scope: &str) -> &str {
    scope.split(':').next().unwrap_or(scope)
}
