//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

use reel_models::{EffectFamily, ValidationError};

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Output already exists: {0}")]
    OutputExists(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("No processor registered for effect family {0}")]
    NoProcessor(EffectFamily),

    #[error("Effect family {family} is already handled by processor '{existing}' (rejected '{incoming}')")]
    DuplicateProcessor {
        family: EffectFamily,
        existing: &'static str,
        incoming: &'static str,
    },

    #[error("GIF decode failed: {0}")]
    GifDecode(#[from] gif::DecodingError),

    #[error("GIF encode failed: {0}")]
    GifEncode(#[from] gif::EncodingError),

    #[error("Texture error: {0}")]
    Texture(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a texture error.
    pub fn texture(message: impl Into<String>) -> Self {
        Self::Texture(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Cancellation is a requested outcome, not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MediaError::Cancelled)
    }

    /// The external transcoder crashed, timed out, was missing, or exited non-zero.
    pub fn is_transcoder_fault(&self) -> bool {
        matches!(
            self,
            MediaError::FfmpegFailed { .. } | MediaError::Timeout(_) | MediaError::FfmpegNotFound
        )
    }

    /// Diagnostic text captured from the transcoder, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            MediaError::FfmpegFailed { stderr, .. } | MediaError::FfprobeFailed { stderr, .. } => {
                stderr.as_deref()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(MediaError::Cancelled.is_cancelled());
        assert!(MediaError::Timeout(300).is_transcoder_fault());
        let failed = MediaError::ffmpeg_failed("exit 1", Some("Invalid filter".into()), Some(1));
        assert!(failed.is_transcoder_fault());
        assert_eq!(failed.diagnostics(), Some("Invalid filter"));
        assert!(!MediaError::internal("x").is_transcoder_fault());
    }

    #[test]
    fn test_validation_is_transparent() {
        let err: MediaError = ValidationError::new("radius must be positive").into();
        assert_eq!(err.to_string(), "validation failed: radius must be positive");
    }
}
