use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_PRODUCT: &str = "unknown";
pub const DEFAULT_EVENT_TYPE: &str = "api_request";
pub const DEFAULT_SEVERITY: &str = "info";

/// A normalized record ready to be written to the `logs` table.
///
/// `raw_data` always holds serialized JSON: objects and arrays stay as they
/// are, strings and other scalars are encoded as JSON scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub source: String,
    pub product: String,
    pub event_type: String,
    pub severity: String,
    pub timestamp: DateTime<Utc>,
    pub raw_data: String,
}

impl LogEntry {
    /// Build an entry stamped with the current UTC time.
    pub fn new(
        source: impl Into<String>,
        product: impl Into<String>,
        event_type: impl Into<String>,
        severity: impl Into<String>,
        raw: &serde_json::Value,
    ) -> Self {
        Self {
            source: source.into(),
            product: product.into(),
            event_type: event_type.into(),
            severity: severity.into(),
            timestamp: Utc::now(),
            raw_data: raw.to_string(),
        }
    }

    /// Override the timestamp (e.g. with one carried by the source item).
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Parse `raw_data` back into a JSON value.
    pub fn raw_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.raw_data)
    }

    /// RFC 3339 rendering used for storage, always with a `Z` suffix.
    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

/// Severity levels commonly emitted by sources. Stored as free text; this
/// enum only normalizes configured values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" | "fatal" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}
