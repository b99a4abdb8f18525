//! API error types and responses.
//!
//! This module defines the standard error format for REST responses and for the
//! `error` frames sent over WebSocket connections. Both use the same codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use concierge_auth::AuthError;
use concierge_control::ControlError;
use concierge_router::ServerEvent;

/// API error type that implements `IntoResponse`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing, invalid or revoked credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The caller's role may not perform this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Invalid request body or parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A consultation operation failed.
    #[error(transparent)]
    Control(ControlError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

/// Error details.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Control(err) => StatusCode::from_u16(err.http_status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "AUTH_FAILED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::BadRequest(_) => "VALIDATION_ERROR",
            Self::Control(err) => err.code(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// The `error` frame reporting this failure to the connection that caused it.
    #[must_use]
    pub fn to_event(&self, op: Option<&str>) -> ServerEvent {
        ServerEvent::error(self.code(), self.to_string(), op)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        let body = ErrorResponse {
            error: ErrorBody { code, message },
        };

        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Internal(_) => {
                tracing::error!(error = %err, "Auth internal error");
                Self::Internal("authentication service error".to_string())
            }
            other => Self::Unauthorized(other.to_string()),
        }
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::Auth(auth_err) => Self::from(auth_err),
            ControlError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                Self::Internal(msg)
            }
            ControlError::ServiceUnavailable(ref msg) => {
                tracing::warn!(error = %msg, "Collaborator unavailable");
                Self::Control(err)
            }
            other => Self::Control(other),
        }
    }
}
