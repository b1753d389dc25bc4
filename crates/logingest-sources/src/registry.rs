//! Maps source `type` tags from the configuration to connector constructors.

use std::collections::HashMap;
use std::sync::Arc;

use logingest_core::SourceConfig;

use crate::connector::SourceConnector;
use crate::error::{Result, SourceError};
use crate::http_json::HttpJsonConnector;

/// Builds a connector from its source configuration.
pub type ConnectorFactory =
    Arc<dyn Fn(&SourceConfig) -> Result<Arc<dyn SourceConnector>> + Send + Sync>;

/// Type tags understood out of the box. `json_placeholder` is kept as an
/// alias of `http_json` for older configuration files.
pub const BUILTIN_TYPES: &[&str] = &["http_json", "json_placeholder"];

#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    factories: HashMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for kind in BUILTIN_TYPES {
            registry.register(kind, |config| {
                Ok(Arc::new(HttpJsonConnector::new(config)?) as Arc<dyn SourceConnector>)
            });
        }
        registry
    }

    /// Register (or replace) the constructor for `kind`.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&SourceConfig) -> Result<Arc<dyn SourceConnector>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered type tags, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn create(&self, config: &SourceConfig) -> Result<Arc<dyn SourceConnector>> {
        let kind = config
            .kind
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| SourceError::MissingType {
                name: config.name.clone(),
            })?;
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| SourceError::UnknownType {
                kind: kind.to_string(),
            })?;
        factory(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_source(kind: &str) -> SourceConfig {
        SourceConfig {
            endpoint: Some("https://jsonplaceholder.typicode.com/posts".to_string()),
            ..SourceConfig::new("posts", kind)
        }
    }

    #[test]
    fn builtins_are_registered() {
        let registry = ConnectorRegistry::with_builtins();
        assert_eq!(registry.kinds(), vec!["http_json", "json_placeholder"]);
        assert!(registry.contains("json_placeholder"));
        assert!(!ConnectorRegistry::new().contains("http_json"));
    }

    #[test]
    fn alias_builds_http_connector() {
        let registry = ConnectorRegistry::with_builtins();
        for kind in BUILTIN_TYPES {
            let connector = registry.create(&http_source(kind)).unwrap();
            assert_eq!(connector.name(), "posts");
        }
    }

    #[test]
    fn unknown_type_is_reported() {
        let registry = ConnectorRegistry::with_builtins();
        let err = registry.create(&http_source("carrier_pigeon")).err().unwrap();
        assert!(matches!(err, SourceError::UnknownType { kind } if kind == "carrier_pigeon"));
    }

    #[test]
    fn missing_type_is_reported() {
        let registry = ConnectorRegistry::with_builtins();
        let mut config = http_source("http_json");
        config.kind = None;
        let err = registry.create(&config).err().unwrap();
        assert!(matches!(err, SourceError::MissingType { name } if name == "posts"));
    }

    #[test]
    fn factory_errors_pass_through() {
        let registry = ConnectorRegistry::with_builtins();
        let config = SourceConfig::new("no-endpoint", "http_json");
        assert!(matches!(
            registry.create(&config),
            Err(SourceError::InvalidConfig { .. })
        ));
    }
}
