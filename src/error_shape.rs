use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// An error as handed to the writer: a name, a message, an optional stack
/// and any number of extra properties.
///
/// Properties may themselves be errors, or lists of errors, which is how
/// aggregate errors carry their members.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedError {
    name: String,
    message: String,
    stack: Option<String>,
    properties: BTreeMap<String, ErrorProperty>,
}

/// A single property attached to a [`LoggedError`].
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorProperty {
    Value(Value),
    Error(LoggedError),
    List(Vec<ErrorProperty>),
}

impl From<Value> for ErrorProperty {
    fn from(value: Value) -> Self {
        ErrorProperty::Value(value)
    }
}

impl From<&str> for ErrorProperty {
    fn from(value: &str) -> Self {
        ErrorProperty::Value(Value::from(value))
    }
}

impl From<String> for ErrorProperty {
    fn from(value: String) -> Self {
        ErrorProperty::Value(Value::from(value))
    }
}

impl From<i64> for ErrorProperty {
    fn from(value: i64) -> Self {
        ErrorProperty::Value(Value::from(value))
    }
}

impl From<bool> for ErrorProperty {
    fn from(value: bool) -> Self {
        ErrorProperty::Value(Value::from(value))
    }
}

impl From<LoggedError> for ErrorProperty {
    fn from(error: LoggedError) -> Self {
        ErrorProperty::Error(error)
    }
}

impl From<Vec<LoggedError>> for ErrorProperty {
    fn from(errors: Vec<LoggedError>) -> Self {
        ErrorProperty::List(errors.into_iter().map(ErrorProperty::Error).collect())
    }
}

impl LoggedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::named("Error", message)
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        LoggedError {
            name: name.into(),
            message: message.into(),
            stack: None,
            properties: BTreeMap::new(),
        }
    }

    /// An `AggregateError` carrying `errors` under the `errors` property.
    pub fn aggregate(message: impl Into<String>, errors: Vec<LoggedError>) -> Self {
        Self::named("AggregateError", message).with_property("errors", errors)
    }

    /// Capture a Rust error. The `source()` chain becomes nested `cause`
    /// properties.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut logged = LoggedError::new(error.to_string());
        if let Some(source) = error.source() {
            logged = logged.with_property("cause", LoggedError::from_error(source));
        }
        logged
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<ErrorProperty>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    pub fn properties(&self) -> &BTreeMap<String, ErrorProperty> {
        &self.properties
    }

    /// Store-facing view: `message` and `stack`, overlaid by every flattened
    /// property. `message` is always the error's own.
    pub fn shape(&self) -> ErrorShape {
        let mut map = Map::new();
        map.insert("message".to_string(), Value::from(self.message.clone()));
        if let Some(stack) = &self.stack {
            map.insert("stack".to_string(), Value::from(stack.clone()));
        }
        map.extend(flatten_properties(self));
        map.insert("message".to_string(), Value::from(self.message.clone()));
        ErrorShape(map)
    }
}

impl std::fmt::Display for LoggedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl Serialize for LoggedError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.shape().serialize(serializer)
    }
}

/// Flattened, JSON-ready form of a [`LoggedError`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ErrorShape(Map<String, Value>);

impl ErrorShape {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn message(&self) -> Option<&str> {
        self.0.get("message").and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// Every property of `error` with nested errors flattened, plus the error's
/// own `message`. A missing error yields an empty map.
pub fn get_error_properties(error: Option<&LoggedError>) -> Map<String, Value> {
    let Some(error) = error else {
        return Map::new();
    };

    let mut map = flatten_properties(error);
    map.insert("message".to_string(), Value::from(error.message.clone()));
    map
}

fn flatten_properties(error: &LoggedError) -> Map<String, Value> {
    error
        .properties
        .iter()
        .map(|(key, value)| (key.clone(), flatten_property(value)))
        .collect()
}

fn flatten_property(property: &ErrorProperty) -> Value {
    match property {
        ErrorProperty::Value(value) => value.clone(),
        ErrorProperty::List(items) => Value::Array(items.iter().map(flatten_property).collect()),
        ErrorProperty::Error(nested) => {
            let mut map = Map::new();
            map.insert("name".to_string(), Value::from(nested.name.clone()));
            map.insert("message".to_string(), Value::from(nested.message.clone()));
            if let Some(stack) = &nested.stack {
                map.insert("stack".to_string(), Value::from(stack.clone()));
            }
            map.extend(get_error_properties(Some(nested)));
            Value::Object(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, thiserror::Error)]
    #[error("query failed")]
    struct QueryError {
        #[source]
        source: std::io::Error,
    }

    #[test]
    fn missing_error_has_no_properties() {
        assert!(get_error_properties(None).is_empty());
    }

    #[test]
    fn message_property_is_overridden_by_own_message() {
        let error = LoggedError::new("real message")
            .with_property("message", "shadowed")
            .with_property("code", "E_TIMEOUT");

        let props = get_error_properties(Some(&error));
        assert_eq!(props["message"], "real message");
        assert_eq!(props["code"], "E_TIMEOUT");
        assert!(!props.contains_key("stack"));
    }

    #[test]
    fn aggregate_errors_are_flattened() {
        let error = LoggedError::aggregate(
            "2 errors",
            vec![LoggedError::new("a"), LoggedError::new("b").with_stack("Error: b\n    at x")],
        );

        let props = get_error_properties(Some(&error));
        assert_eq!(
            Value::Object(props),
            json!({
                "message": "2 errors",
                "errors": [
                    { "name": "Error", "message": "a" },
                    { "name": "Error", "message": "b", "stack": "Error: b\n    at x" },
                ],
            })
        );
    }

    #[test]
    fn nested_error_properties_win_over_standard_fields() {
        let inner = LoggedError::named("HttpError", "bad gateway")
            .with_property("name", "UpstreamError")
            .with_property("status", 502_i64);
        let error = LoggedError::new("request failed").with_property("cause", inner);

        let props = get_error_properties(Some(&error));
        assert_eq!(props["cause"]["name"], "UpstreamError");
        assert_eq!(props["cause"]["message"], "bad gateway");
        assert_eq!(props["cause"]["status"], 502);
    }

    #[test]
    fn shape_keeps_message_and_stack() {
        let error = LoggedError::new("boom")
            .with_stack("Error: boom")
            .with_property("retryable", false);
        let shape = error.shape();

        assert_eq!(shape.message(), Some("boom"));
        assert_eq!(shape.get("stack"), Some(&json!("Error: boom")));
        assert_eq!(shape.get("retryable"), Some(&json!(false)));
        assert_eq!(serde_json::to_value(&error).unwrap()["message"], "boom");
    }

    #[test]
    fn message_property_cannot_replace_the_message() {
        let error = LoggedError::new("real")
            .with_property("message", Value::Null)
            .with_property("code", "E_REAL");
        let shape = error.shape();

        assert_eq!(shape.message(), Some("real"));
        assert_eq!(shape.get("code"), Some(&json!("E_REAL")));
    }

    #[test]
    fn source_chain_becomes_causes() {
        let error = QueryError {
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connection timed out"),
        };

        let logged = LoggedError::from_error(&error);
        assert_eq!(logged.message(), "query failed");

        let props = get_error_properties(Some(&logged));
        assert_eq!(props["cause"]["message"], "connection timed out");
    }
}
