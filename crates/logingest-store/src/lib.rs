//! `logingest-store` — embedded SQLite persistence for normalized log entries.

pub mod db;
pub mod error;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{LogSink, LogStore};
