use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogingestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LogingestError {
    /// Short error code used in structured log lines.
    pub fn code(&self) -> &'static str {
        match self {
            LogingestError::Config(_) => "CONFIG_ERROR",
            LogingestError::ConfigNotFound { .. } => "CONFIG_NOT_FOUND",
            LogingestError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, LogingestError>;
