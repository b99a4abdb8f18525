//! Bearer token verification for concierge.
//!
//! This crate answers one question for the gateway: "is this credential valid, and
//! as which identity?" It provides:
//!
//! - HS256 JWT verification with expiry and optional issuer checks
//! - A revocation list consulted on every authentication
//! - A mock verifier for tests (feature `test-utils`)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │   Gateway        │────▶│  TokenVerifier   │
//! │   (HTTP/WS)      │     │  (trait)         │
//! └──────────────────┘     └────────┬─────────┘
//!                                   │
//!                          ┌────────▼─────────┐
//!                          │  HmacVerifier    │
//!                          │  (signature/exp) │
//!                          └────────┬─────────┘
//!                                   │
//!                          ┌────────▼─────────┐
//!                          │  RevocationList  │
//!                          │  (digest → exp)  │
//!                          └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use concierge_auth::{AuthConfig, HmacVerifier, MemoryRevocationList, TokenVerifier};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let verifier = HmacVerifier::new(
//!     AuthConfig::with_secret("change-me"),
//!     Arc::new(MemoryRevocationList::new()),
//! );
//!
//! let token = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9...";
//! let verified = verifier.authenticate(token).await?;
//! println!("Connected as {}", verified.identity);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod jwt;
pub mod revocation;

pub use error::{AuthError, Result};
pub use jwt::{Claims, HmacVerifier, TokenVerifier, VerifiedIdentity};
pub use revocation::{MemoryRevocationList, RevocationList};

#[cfg(any(test, feature = "test-utils"))]
pub use jwt::MockTokenVerifier;

/// Configuration for token verification.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Shared HS256 secret.
    pub secret: String,
    /// Expected `iss` claim; not checked when `None`.
    pub issuer: Option<String>,
    /// Clock skew tolerated on `exp`, in seconds.
    pub leeway_seconds: u64,
}

impl AuthConfig {
    /// Configuration with the given secret and default checks.
    #[must_use]
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ..Self::default()
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: None,
            leeway_seconds: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = AuthConfig::with_secret("s3cret");
        assert_eq!(config.secret, "s3cret");
        assert!(config.issuer.is_none());
        assert_eq!(config.leeway_seconds, 30);
    }

    #[test]
    fn auth_error_status_codes() {
        assert_eq!(AuthError::TokenExpired.http_status_code(), 401);
        assert_eq!(AuthError::InvalidSignature.http_status_code(), 401);
        assert_eq!(AuthError::Revoked.http_status_code(), 401);
        assert_eq!(AuthError::Timeout.http_status_code(), 408);
        assert_eq!(AuthError::Internal("test".into()).http_status_code(), 500);
    }

    #[test]
    fn auth_error_retriable() {
        assert!(AuthError::TokenExpired.is_retriable());
        assert!(AuthError::Timeout.is_retriable());
        assert!(!AuthError::Revoked.is_retriable());
        assert!(!AuthError::InvalidSignature.is_retriable());
    }
}
