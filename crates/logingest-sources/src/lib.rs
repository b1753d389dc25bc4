//! `logingest-sources` — connectors that pull raw records from external
//! origins and normalize them into [`logingest_core::LogEntry`] values.

pub mod connector;
pub mod error;
pub mod http_json;
pub mod registry;

pub use connector::SourceConnector;
pub use error::{Result, SourceError};
pub use http_json::HttpJsonConnector;
pub use registry::{ConnectorFactory, ConnectorRegistry, BUILTIN_TYPES};
