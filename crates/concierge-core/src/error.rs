//! Common error types for concierge.
//!
//! This module provides shared error types that are used across multiple crates.

use crate::ids::{ConsultationId, MessageId};
use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout the concierge system.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A consultation with the specified ID was not found.
    #[error("consultation not found: {0}")]
    ConsultationNotFound(ConsultationId),

    /// A message with the specified ID was not found.
    #[error("message not found: {0}")]
    MessageNotFound(MessageId),

    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// An unknown role or status name was provided.
    #[error("unknown {kind}: {value}")]
    UnknownVariant {
        /// What was being parsed (`role`, `staff status`).
        kind: &'static str,
        /// The rejected input.
        value: String,
    },

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}
