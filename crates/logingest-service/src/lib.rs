//! `logingest-service` — turns source configuration into scheduled
//! fetch, transform and store jobs.

pub mod error;
pub mod service;

pub use error::{Result, ServiceError};
pub use service::{SchedulerService, ServiceStatus};
