//! Store error types.

use clipforge_models::ErrorKind;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upload session expired: {0}")]
    Expired(String),

    #[error("Upload incomplete: {missing} chunk(s) missing")]
    Incomplete { missing: usize },

    #[error("Size {size} exceeds maximum of {max} bytes")]
    Oversize { size: u64, max: u64 },

    #[error("Rejected content type: {0}")]
    RejectedType(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameters(msg.into())
    }

    pub fn rejected_type(msg: impl Into<String>) -> Self {
        Self::RejectedType(msg.into())
    }

    /// Classify this error into the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Forbidden(_) => ErrorKind::Forbidden,
            StoreError::Conflict(_) | StoreError::InvalidTransition { .. } => ErrorKind::Conflict,
            StoreError::Expired(_) => ErrorKind::Expired,
            StoreError::Incomplete { .. } => ErrorKind::Incomplete,
            StoreError::Oversize { .. } => ErrorKind::Oversize,
            StoreError::RejectedType(_) => ErrorKind::RejectedType,
            StoreError::InvalidParameters(_) => ErrorKind::InvalidParameters,
            StoreError::Io(_) => ErrorKind::TransientIo,
            StoreError::Database(_) | StoreError::Json(_) => ErrorKind::Internal,
        }
    }
}
