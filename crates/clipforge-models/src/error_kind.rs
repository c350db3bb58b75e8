//! The shared error taxonomy.
//!
//! Every failure surfaced by the pipeline or the HTTP layer carries one of
//! these kinds. The worker decides retryable vs terminal from the kind alone.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Malformed or out-of-range request parameters
    InvalidParameters,
    /// Referenced entity does not exist
    NotFound,
    /// Principal does not own the referenced entity
    Forbidden,
    /// State conflict (e.g. chunk rewrite with different length)
    Conflict,
    /// Upload session TTL elapsed
    Expired,
    /// Upload completed with missing chunks
    Incomplete,
    /// Declared or actual size exceeds the configured maximum
    Oversize,
    /// Content type not acceptable for processing
    RejectedType,
    /// Input media could not be read or has no video stream
    Unreadable,
    /// Video codec outside the supported set
    UnsupportedCodec,
    /// Transient local I/O failure
    TransientIo,
    /// Transient failure in an external dependency
    TransientDependency,
    /// Stage or job deadline elapsed
    Timeout,
    /// Worker lease lapsed while the job was running
    WorkerLost,
    /// Job was cancelled by the user
    Cancelled,
    /// Too many requests from this client
    RateLimited,
    /// Unclassified server-side failure
    Internal,
    /// Service temporarily unable to accept work
    Unavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidParameters => "invalid-parameters",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Expired => "expired",
            ErrorKind::Incomplete => "incomplete",
            ErrorKind::Oversize => "oversize",
            ErrorKind::RejectedType => "rejected-type",
            ErrorKind::Unreadable => "unreadable",
            ErrorKind::UnsupportedCodec => "unsupported-codec",
            ErrorKind::TransientIo => "transient-io",
            ErrorKind::TransientDependency => "transient-dependency",
            ErrorKind::Timeout => "timeout",
            ErrorKind::WorkerLost => "worker-lost",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::Internal => "internal",
            ErrorKind::Unavailable => "unavailable",
        }
    }

    /// Whether a job failing with this kind may be re-enqueued.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransientIo
                | ErrorKind::TransientDependency
                | ErrorKind::Timeout
                | ErrorKind::WorkerLost
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = ErrorKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invalid-parameters" => Ok(ErrorKind::InvalidParameters),
            "not-found" => Ok(ErrorKind::NotFound),
            "forbidden" => Ok(ErrorKind::Forbidden),
            "conflict" => Ok(ErrorKind::Conflict),
            "expired" => Ok(ErrorKind::Expired),
            "incomplete" => Ok(ErrorKind::Incomplete),
            "oversize" => Ok(ErrorKind::Oversize),
            "rejected-type" => Ok(ErrorKind::RejectedType),
            "unreadable" => Ok(ErrorKind::Unreadable),
            "unsupported-codec" => Ok(ErrorKind::UnsupportedCodec),
            "transient-io" => Ok(ErrorKind::TransientIo),
            "transient-dependency" => Ok(ErrorKind::TransientDependency),
            "timeout" => Ok(ErrorKind::Timeout),
            "worker-lost" => Ok(ErrorKind::WorkerLost),
            "cancelled" => Ok(ErrorKind::Cancelled),
            "rate-limited" => Ok(ErrorKind::RateLimited),
            "internal" => Ok(ErrorKind::Internal),
            "unavailable" => Ok(ErrorKind::Unavailable),
            _ => Err(ErrorKindParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown error kind: {0}")]
pub struct ErrorKindParseError(String);

/// Classified job failure persisted on the job row and sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    /// Failure classification
    pub kind: ErrorKind,
    /// Short human-readable message
    pub message: String,
    /// Derived from `kind`; stored so the wire shape is self-contained
    pub retryable: bool,
}

impl JobError {
    /// Create a new classified error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Job was cancelled")
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrip() {
        for kind in [
            ErrorKind::InvalidParameters,
            ErrorKind::RejectedType,
            ErrorKind::TransientDependency,
            ErrorKind::WorkerLost,
            ErrorKind::Cancelled,
        ] {
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), kind);
        }
        assert!("nope".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn retryable_set_matches_taxonomy() {
        assert!(ErrorKind::TransientIo.is_retryable());
        assert!(ErrorKind::TransientDependency.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::WorkerLost.is_retryable());

        assert!(!ErrorKind::Unreadable.is_retryable());
        assert!(!ErrorKind::UnsupportedCodec.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
        assert!(!ErrorKind::InvalidParameters.is_retryable());
        assert!(!ErrorKind::Internal.is_retryable());
    }

    #[test]
    fn job_error_derives_retryable() {
        let err = JobError::new(ErrorKind::Timeout, "stage deadline elapsed");
        assert!(err.retryable);

        let err = JobError::new(ErrorKind::Unreadable, "no video stream");
        assert!(!err.retryable);
    }

    #[test]
    fn kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ErrorKind::RejectedType).unwrap();
        assert_eq!(json, "\"rejected-type\"");
    }
}
