use async_trait::async_trait;
use logingest_core::LogEntry;
use serde_json::Value;

use crate::error::Result;

/// A pluggable origin of log records.
///
/// `fetch` talks to the outside world; `transform` is pure and turns the raw
/// items into entries stamped with this connector's source name.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Source name recorded on every entry.
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<Value>>;

    fn transform(&self, items: Vec<Value>) -> Vec<LogEntry>;
}
