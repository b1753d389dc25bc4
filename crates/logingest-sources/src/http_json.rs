use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use logingest_core::types::Severity;
use logingest_core::{LogEntry, SourceConfig};
use serde_json::Value;
use tracing::{debug, warn};

use crate::connector::SourceConnector;
use crate::error::{Result, SourceError};

/// Polls a JSON endpoint with a GET request.
///
/// A top-level array yields one item per element; any other document is
/// treated as a single item.
pub struct HttpJsonConnector {
    client: reqwest::Client,
    name: String,
    endpoint: String,
    params: Vec<(String, String)>,
    product: String,
    event_type: String,
    severity: String,
    timestamp_field: Option<String>,
}

impl HttpJsonConnector {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| SourceError::InvalidConfig {
                name: config.name.clone(),
                reason: "missing endpoint".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let params = config
            .params
            .iter()
            .map(|(k, v)| (k.clone(), query_value(v)))
            .collect();

        Ok(Self {
            client,
            name: config.name.clone(),
            endpoint,
            params,
            product: config.product.clone(),
            event_type: config.event_type.clone(),
            severity: normalize_severity(&config.severity),
            timestamp_field: config.timestamp_field.clone(),
        })
    }

    /// Timestamp carried by the item, if configured and parseable.
    fn item_timestamp(&self, item: &Value) -> Option<DateTime<Utc>> {
        let field = self.timestamp_field.as_deref()?;
        let raw = item.get(field)?.as_str()?;
        match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                debug!(source = %self.name, field, value = raw, error = %e, "unparseable item timestamp");
                None
            }
        }
    }
}

#[async_trait]
impl SourceConnector for HttpJsonConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<Value>> {
        debug!(source = %self.name, endpoint = %self.endpoint, "fetching");

        let resp = self
            .client
            .get(&self.endpoint)
            .query(&self.params)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(source = %self.name, status, body = %body, "source API error");
            return Err(SourceError::Api { status, body });
        }

        let text = resp.text().await?;
        let doc: Value =
            serde_json::from_str(&text).map_err(|e| SourceError::Parse(e.to_string()))?;

        let items = match doc {
            Value::Array(items) => items,
            other => vec![other],
        };
        debug!(source = %self.name, items = items.len(), "fetched");
        Ok(items)
    }

    fn transform(&self, items: Vec<Value>) -> Vec<LogEntry> {
        items
            .iter()
            .map(|item| {
                let entry = LogEntry::new(
                    &self.name,
                    &self.product,
                    &self.event_type,
                    &self.severity,
                    item,
                );
                match self.item_timestamp(item) {
                    Some(ts) => entry.with_timestamp(ts),
                    None => entry,
                }
            })
            .collect()
    }
}

/// Query-string rendering: strings verbatim, everything else as JSON text.
fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Canonical spelling for known levels; unknown levels are kept verbatim.
fn normalize_severity(raw: &str) -> String {
    raw.parse::<Severity>()
        .map(|s| s.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoint: &str) -> SourceConfig {
        SourceConfig {
            endpoint: Some(endpoint.to_string()),
            ..SourceConfig::new("svc", "http_json")
        }
    }

    #[test]
    fn transform_keeps_raw_item() {
        let mut cfg = config("http://localhost/posts");
        cfg.event_type = "test".to_string();
        let connector = HttpJsonConnector::new(&cfg).unwrap();

        let item = json!({"id": 1, "title": "Test", "body": "Test body", "userId": 1});
        let before = Utc::now();
        let entries = connector.transform(vec![item.clone()]);

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.source, "svc");
        assert_eq!(entry.event_type, "test");
        assert_eq!(entry.product, "unknown");
        assert_eq!(entry.severity, "info");
        assert_eq!(entry.raw_value().unwrap(), item);
        assert!(entry.timestamp >= before);
        assert!(entry.timestamp <= Utc::now());
    }

    #[test]
    fn transform_scalars_into_json() {
        let connector = HttpJsonConnector::new(&config("http://localhost")).unwrap();
        let entries = connector.transform(vec![json!("just text"), json!(42), json!(null)]);
        let raws: Vec<&str> = entries.iter().map(|e| e.raw_data.as_str()).collect();
        assert_eq!(raws, ["\"just text\"", "42", "null"]);
    }

    #[test]
    fn transform_uses_item_timestamp_field() {
        let mut cfg = config("http://localhost");
        cfg.timestamp_field = Some("created".to_string());
        let connector = HttpJsonConnector::new(&cfg).unwrap();

        let entries = connector.transform(vec![
            json!({"created": "2026-01-05T08:30:00+02:00"}),
            json!({"created": "yesterday"}),
            json!({"other": 1}),
        ]);
        assert_eq!(entries[0].timestamp_rfc3339(), "2026-01-05T06:30:00.000000Z");
        assert!(entries[1].timestamp > entries[0].timestamp);
        assert!(entries[2].timestamp > entries[0].timestamp);
    }

    #[test]
    fn severity_is_normalized() {
        let mut cfg = config("http://localhost");
        cfg.severity = "WARN".to_string();
        assert_eq!(HttpJsonConnector::new(&cfg).unwrap().severity, "warning");
        cfg.severity = "notice".to_string();
        assert_eq!(HttpJsonConnector::new(&cfg).unwrap().severity, "notice");
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let cfg = SourceConfig::new("svc", "http_json");
        assert!(matches!(
            HttpJsonConnector::new(&cfg),
            Err(SourceError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn fetch_list_with_query_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/posts"))
            .and(query_param("userId", "1"))
            .and(query_param("_limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 1, "userId": 1},
                {"id": 2, "userId": 1}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let mut cfg = config(&format!("{}/posts", server.uri()));
        cfg.params.insert("userId".to_string(), json!(1));
        cfg.params.insert("_limit".to_string(), json!("2"));
        let items = HttpJsonConnector::new(&cfg).unwrap().fetch().await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["id"], 2);
    }

    #[tokio::test]
    async fn fetch_single_object_wraps_it() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let cfg = config(&format!("{}/status", server.uri()));
        let items = HttpJsonConnector::new(&cfg).unwrap().fetch().await.unwrap();
        assert_eq!(items, vec![json!({"ok": true})]);
    }

    #[tokio::test]
    async fn fetch_non_success_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let cfg = config(&server.uri());
        let err = HttpJsonConnector::new(&cfg).unwrap().fetch().await.unwrap_err();
        match err {
            SourceError::Api { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_invalid_json_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let cfg = config(&server.uri());
        let err = HttpJsonConnector::new(&cfg).unwrap().fetch().await.unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
    }

    #[tokio::test]
    async fn fetch_unreachable_is_http_error() {
        // Port 9 (discard) on localhost is not expected to accept connections.
        let cfg = config("http://127.0.0.1:9/");
        let err = HttpJsonConnector::new(&cfg).unwrap().fetch().await.unwrap_err();
        assert!(matches!(err, SourceError::Http(_)));
    }
}
