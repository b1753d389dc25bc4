use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("unknown source type: {kind}")]
    UnknownType { kind: String },

    #[error("source '{name}' has no type")]
    MissingType { name: String },

    #[error("invalid configuration for source '{name}': {reason}")]
    InvalidConfig { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SourceError>;
