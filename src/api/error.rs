//! API error types and conversions

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::model::{StatusResponse, TestStatus};
use crate::session::SessionError;

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// API error types
///
/// Every variant answers with the `{id: 2, description}` status body.
#[derive(Debug)]
pub enum ApiError {
    /// A run is already active
    Conflict(String),

    /// Malformed request parameters
    InvalidRequest(String),

    /// Internal server error
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        warn!("request failed: {message}");
        (status, Json(StatusResponse::from(TestStatus::Error))).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AlreadyRunning => ApiError::Conflict(err.to_string()),
            SessionError::InvalidRequest(_) => ApiError::InvalidRequest(err.to_string()),
            SessionError::Media(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{err:#}"))
    }
}
