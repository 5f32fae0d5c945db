//! API error type with HTTP status code mapping.
//!
//! [`ApiError`] implements `axum::response::IntoResponse` and renders a
//! small JSON body alongside the status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use imgsrv_core::DeriveError;
use serde::Serialize;

/// Error detail in API responses.
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorDetail {
    /// Machine-readable error code (e.g. "NOT_FOUND").
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed request or unusable image (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unknown source (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Origin download failed (502).
    #[error("bad gateway: {0}")]
    BadGateway(String),

    /// A stage ran out of time (504).
    #[error("timeout: {0}")]
    Timeout(String),

    /// Internal server error (500).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadGateway(_) => (StatusCode::BAD_GATEWAY, "BAD_GATEWAY"),
            ApiError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        let message = match self {
            ApiError::BadRequest(m)
            | ApiError::NotFound(m)
            | ApiError::BadGateway(m)
            | ApiError::Timeout(m)
            | ApiError::Internal(m) => m,
        };
        let body = serde_json::json!({ "error": ApiErrorDetail { code, message } });
        (status, axum::Json(body)).into_response()
    }
}

impl From<DeriveError> for ApiError {
    fn from(err: DeriveError) -> Self {
        match &err {
            DeriveError::InvalidParameters(_)
            | DeriveError::Decode { .. }
            | DeriveError::UnsupportedFormat { .. }
            | DeriveError::FileTooLarge { .. }
            | DeriveError::ImageTooLarge { .. } => ApiError::BadRequest(err.to_string()),
            DeriveError::SourceNotFound(_) => ApiError::NotFound(err.to_string()),
            DeriveError::Fetch { .. } => ApiError::BadGateway(err.to_string()),
            DeriveError::Timeout { .. } => ApiError::Timeout(err.to_string()),
            DeriveError::TransformFailure { .. }
            | DeriveError::CoordinatorDefect { .. }
            | DeriveError::CoordinatorUnavailable(_)
            | DeriveError::Encode { .. }
            | DeriveError::Storage { .. } => ApiError::Internal(err.to_string()),
        }
    }
}
