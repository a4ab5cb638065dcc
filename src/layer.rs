use crate::error_shape::LoggedError;
use crate::level::LogLevel;
use crate::writer::Writer;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Events from this crate are never shipped, or a failing store would feed
/// its own failures back into the queue.
const OWN_TARGET: &str = "elastic_log_writer";

/// `tracing_subscriber` layer that hands every event to a [`Writer`].
///
/// The event target becomes the scope, the `message` field the message, a
/// field recorded as an error (`error = &e as &dyn Error`) the logged error,
/// and every other field the context object.
pub struct ElasticLayer {
    writer: Arc<dyn Writer>,
}

impl ElasticLayer {
    pub fn new(writer: Arc<dyn Writer>) -> Self {
        ElasticLayer { writer }
    }
}

impl<S> Layer<S> for ElasticLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if meta.target().starts_with(OWN_TARGET) {
            return;
        }

        let mut fields = Map::new();
        let mut message: Option<String> = None;
        let mut error: Option<LoggedError> = None;

        let mut visitor = FieldVisitor {
            fields: &mut fields,
            message: &mut message,
            error: &mut error,
        };
        event.record(&mut visitor);

        let context = if fields.is_empty() {
            None
        } else {
            Some(Value::Object(fields))
        };

        self.writer.write(
            meta.target(),
            LogLevel::from(*meta.level()),
            message.as_deref().unwrap_or_default(),
            error.as_ref(),
            context.as_ref(),
        );
    }
}

pub struct FieldVisitor<'a> {
    pub fields: &'a mut Map<String, Value>,
    pub message: &'a mut Option<String>,
    pub error: &'a mut Option<LoggedError>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        if self.error.is_none() {
            *self.error = Some(LoggedError::from_error(value));
        } else {
            self.fields.insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), Value::String(format!("{:?}", value)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    #[derive(Debug, Clone, PartialEq)]
    struct Written {
        scope: String,
        level: LogLevel,
        message: String,
        error: Option<LoggedError>,
        context: Option<Value>,
    }

    #[derive(Default)]
    struct RecordingWriter {
        calls: Mutex<Vec<Written>>,
    }

    impl Writer for RecordingWriter {
        fn write(
            &self,
            scope: &str,
            level: LogLevel,
            message: &str,
            error: Option<&LoggedError>,
            context: Option<&Value>,
        ) {
            self.calls.lock().unwrap().push(Written {
                scope: scope.to_string(),
                level,
                message: message.to_string(),
                error: error.cloned(),
                context: context.cloned(),
            });
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("connection refused")]
    struct Refused;

    fn capture(f: impl FnOnce()) -> Vec<Written> {
        let writer = Arc::new(RecordingWriter::default());
        let subscriber = Registry::default().with(ElasticLayer::new(writer.clone()));
        tracing::subscriber::with_default(subscriber, f);
        let calls = writer.calls.lock().unwrap().clone();
        calls
    }

    #[test]
    fn event_fields_become_a_log_call() {
        let calls = capture(|| {
            tracing::info!(target: "shop:api", order_id = 7, paid = true, ratio = 0.5, "order placed");
        });

        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.scope, "shop:api");
        assert_eq!(call.level, LogLevel::Info);
        assert_eq!(call.message, "order placed");
        assert!(call.error.is_none());
        assert_eq!(
            call.context,
            Some(serde_json::json!({ "order_id": 7, "paid": true, "ratio": 0.5 }))
        );
    }

    #[test]
    fn error_field_is_captured_as_logged_error() {
        let calls = capture(|| {
            let err = Refused;
            tracing::error!(target: "db", error = &err as &dyn std::error::Error, "query failed");
        });

        let call = &calls[0];
        assert_eq!(call.level, LogLevel::Error);
        assert_eq!(call.error.as_ref().map(|e| e.message()), Some("connection refused"));
        assert!(call.context.is_none());
    }

    #[test]
    fn own_diagnostics_are_skipped() {
        let calls = capture(|| {
            tracing::warn!(target: "elastic_log_writer::flusher", "store unavailable");
            tracing::warn!(target: "app", "kept");
        });

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].scope, "app");
    }
}
