use logingest_scheduler::SchedulerError;
use logingest_sources::SourceError;
use logingest_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown service type '{kind}' for source '{name}'")]
    UnknownServiceType { name: String, kind: String },

    #[error("invalid source configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Schedule(#[from] SchedulerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("service not found: {0}")]
    NotFound(String),
}

impl ServiceError {
    /// Classify a connector construction failure for source `name`.
    pub(crate) fn from_build(name: &str, err: SourceError) -> Self {
        match err {
            SourceError::UnknownType { kind } => ServiceError::UnknownServiceType {
                name: name.to_string(),
                kind,
            },
            e @ (SourceError::MissingType { .. } | SourceError::InvalidConfig { .. }) => {
                ServiceError::Config(e.to_string())
            }
            other => ServiceError::Source(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
