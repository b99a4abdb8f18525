//! Error types for consultation control.
//!
//! Every operation error is reported to the invoking connection only. The variants
//! are distinguishable so a client that lost a race can refresh instead of retrying.

use concierge_core::{ConsultationId, MessageId, StaffId};
use concierge_router::RouterError;
use concierge_store::{Consultation, StoreError};
use thiserror::Error;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in consultation operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The credential was missing, invalid or revoked.
    #[error("authentication error: {0}")]
    Auth(#[from] concierge_auth::AuthError),

    /// The user already has an open consultation; it is carried here.
    #[error("user {} already has open consultation {}", existing.user_id, existing.id)]
    Conflict {
        /// The open consultation.
        existing: Box<Consultation>,
    },

    /// The operation is not allowed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The target staff member cannot take the consultation.
    #[error("staff {staff_id} is not a valid target: {reason}")]
    InvalidTarget {
        /// The requested staff member.
        staff_id: StaffId,
        /// Why it was refused.
        reason: &'static str,
    },

    /// The request payload is malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// The consultation does not exist.
    #[error("consultation not found: {0}")]
    NotFound(ConsultationId),

    /// The message does not exist.
    #[error("message not found: {0}")]
    MessageNotFound(MessageId),

    /// The caller may not act on this consultation or message.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A collaborator (store, presence) failed; the client may retry.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::Auth(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) | Self::MessageNotFound(_) => 404,
            Self::Conflict { .. } | Self::InvalidState(_) => 409,
            Self::InvalidTarget { .. } | Self::Validation(_) => 400,
            Self::ServiceUnavailable(_) => 503,
            Self::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code sent to clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "AUTH_FAILED",
            Self::Conflict { .. } => "CONFLICT",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::InvalidTarget { .. } => "INVALID_TARGET",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::MessageNotFound(_) => "MESSAGE_NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_))
    }
}

impl From<StoreError> for ControlError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => Self::InvalidState(msg),
            StoreError::NotFound => Self::Internal("record disappeared during update".to_string()),
            StoreError::Database(_) | StoreError::Serialization(_) => {
                Self::ServiceUnavailable(err.to_string())
            }
        }
    }
}

impl From<RouterError> for ControlError {
    fn from(err: RouterError) -> Self {
        Self::ServiceUnavailable(err.to_string())
    }
}
