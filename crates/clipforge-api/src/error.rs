//! API error types and the wire error object.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use clipforge_models::ErrorKind;
use clipforge_scheduler::SchedulerError;
use clipforge_store::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classified kind for the wire error object.
    pub fn kind(&self) -> ErrorKind {
        match self {
            // Token validation is an upstream concern; a missing principal
            // is reported as forbidden access with a 401 status.
            ApiError::Unauthenticated(_) => ErrorKind::Forbidden,
            ApiError::BadRequest(_) => ErrorKind::InvalidParameters,
            ApiError::RateLimited => ErrorKind::RateLimited,
            ApiError::Store(e) => e.kind(),
            ApiError::Scheduler(e) => match e {
                SchedulerError::Store(e) => e.kind(),
                SchedulerError::Media(e) => e.kind(),
                SchedulerError::ShuttingDown => ErrorKind::Unavailable,
                SchedulerError::Internal(_) => ErrorKind::Internal,
            },
            ApiError::Internal(_) => ErrorKind::Internal,
        }
    }

    fn status_code(&self) -> StatusCode {
        if matches!(self, ApiError::Unauthenticated(_)) {
            return StatusCode::UNAUTHORIZED;
        }
        match self.kind() {
            ErrorKind::InvalidParameters | ErrorKind::Incomplete => StatusCode::BAD_REQUEST,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Expired => StatusCode::GONE,
            ErrorKind::Oversize => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::RejectedType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Wire error object: `{"error": {"kind", "message", "retryable"}}`.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorObject,
}

#[derive(Serialize)]
struct ErrorObject {
    kind: ErrorKind,
    message: String,
    retryable: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();

        // Internal details stay out of responses in production.
        let message = match (&self, kind) {
            (_, ErrorKind::Internal)
                if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" =>
            {
                "An internal error occurred".to_string()
            }
            _ => self.to_string(),
        };

        let body = ErrorBody {
            error: ErrorObject {
                kind,
                message,
                retryable: kind.is_retryable(),
            },
        };

        (status, Json(body)).into_response()
    }
}
