//! Error types for media operations.

use std::path::PathBuf;

use thiserror::Error;

use clipforge_models::ErrorKind;

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

    #[error("Input is not readable media: {0}")]
    Unreadable(String),

    #[error("Unsupported video codec: {0}")]
    UnsupportedCodec(String),

    #[error("Transcription failed: {0}")]
    AsrFailed(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
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

    /// Create an unreadable-input error.
    pub fn unreadable(message: impl Into<String>) -> Self {
        Self::Unreadable(message.into())
    }

    /// Create a transcription failure.
    pub fn asr_failed(message: impl Into<String>) -> Self {
        Self::AsrFailed(message.into())
    }

    /// Classify this error into the shared taxonomy. The worker uses only
    /// the kind to decide retryable vs terminal.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MediaError::Unreadable(_)
            | MediaError::FfprobeFailed { .. }
            | MediaError::FileNotFound(_) => ErrorKind::Unreadable,
            MediaError::UnsupportedCodec(_) => ErrorKind::UnsupportedCodec,
            MediaError::AsrFailed(_) => ErrorKind::TransientDependency,
            MediaError::Cancelled => ErrorKind::Cancelled,
            MediaError::Timeout(_) => ErrorKind::Timeout,
            MediaError::Io(_) => ErrorKind::TransientIo,
            MediaError::FfmpegNotFound | MediaError::FfprobeNotFound => {
                ErrorKind::TransientDependency
            }
            MediaError::FfmpegFailed { .. } | MediaError::JsonParse(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_taxonomy() {
        assert_eq!(
            MediaError::unreadable("no video stream").kind(),
            ErrorKind::Unreadable
        );
        assert_eq!(
            MediaError::UnsupportedCodec("prores".into()).kind(),
            ErrorKind::UnsupportedCodec
        );
        assert_eq!(MediaError::asr_failed("down").kind(), ErrorKind::TransientDependency);
        assert_eq!(MediaError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(MediaError::Timeout(30).kind(), ErrorKind::Timeout);
    }
}
