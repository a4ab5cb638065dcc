use crate::error_shape::ErrorShape;
use crate::level::LogLevel;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

/// Document written to the search store for a single log call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub scope: String,
    pub log: LogMeta,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    pub host: HostInfo,
    pub service: ServiceInfo,
    pub process: ProcessInfo,
    #[serde(rename = "@timestamp", serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<IdRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<IdRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<IdRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogMeta {
    pub level: LogLevel,
}

/// Host name, stored under both `hostname` and `name` for schema
/// compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostInfo {
    pub hostname: String,
    pub name: String,
}

impl HostInfo {
    pub fn new(hostname: impl Into<String>) -> Self {
        let hostname = hostname.into();
        HostInfo {
            name: hostname.clone(),
            hostname,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdRef {
    pub id: String,
}

impl IdRef {
    pub fn new(id: impl Into<String>) -> Self {
        IdRef { id: id.into() }
    }
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}
