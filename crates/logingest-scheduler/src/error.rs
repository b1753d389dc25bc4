use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The cron expression is malformed or can never fire.
    #[error("Invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    /// The configured timezone is not a known IANA name.
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// No job with the given ID is registered.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// The engine could not be started (e.g. no async runtime).
    #[error("Scheduler failed to start: {0}")]
    EngineStart(String),
}

impl SchedulerError {
    pub(crate) fn invalid(expression: &str, reason: impl Into<String>) -> Self {
        SchedulerError::InvalidSchedule {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
