//! Error types for the router crate.

use thiserror::Error;

/// Errors that can occur in presence tracking or assignment.
#[derive(Error, Debug)]
pub enum RouterError {
    /// The presence store could not be read or written.
    #[error("presence store error: {0}")]
    Presence(String),

    /// The round-robin cursor could not be read or advanced.
    #[error("cursor store error: {0}")]
    Cursor(String),

    /// Candidate lookup against the durable store failed.
    #[error("store error: {0}")]
    Store(#[from] concierge_store::StoreError),
}

impl RouterError {
    /// Check if this error is retriable.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        true
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        503
    }
}

/// A specialized Result type for router operations.
pub type Result<T> = std::result::Result<T, RouterError>;
