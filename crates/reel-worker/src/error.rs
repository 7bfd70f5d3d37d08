//! Worker error types.

use thiserror::Error;

use reel_models::{JobId, ValidationError};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Media error: {0}")]
    Media(#[from] reel_media::MediaError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Cancellation surfaced from the media layer.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::Media(e) if e.is_cancelled())
    }

    /// Every violation, when this is a validation failure.
    pub fn validation_issues(&self) -> Option<&[String]> {
        match self {
            WorkerError::Validation(e) => Some(e.issues()),
            WorkerError::Media(reel_media::MediaError::Validation(e)) => Some(e.issues()),
            _ => None,
        }
    }
}
