//! `logingest-core` — configuration, shared types and the top-level error.

pub mod config;
pub mod error;
pub mod types;

pub use config::{LogingestConfig, SchedulerConfig, SourceConfig};
pub use error::{LogingestError, Result};
pub use types::LogEntry;
