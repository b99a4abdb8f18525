//! Authentication extractors.
//!
//! This module provides the `AuthUser` extractor that verifies bearer tokens
//! (signature, expiry and revocation) and yields the caller's identity.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use concierge_auth::{TokenVerifier, VerifiedIdentity};
use concierge_control::{ConsultationControl, Identity, StaffId, UserId};
use concierge_core::AdminId;

use crate::error::ApiError;
use crate::state::GatewayState;

/// An authenticated caller extracted from a bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    /// Who the caller is.
    pub identity: Identity,
}

impl AuthUser {
    /// Create an `AuthUser` from a verified token.
    #[must_use]
    pub const fn from_verified(verified: &VerifiedIdentity) -> Self {
        Self {
            identity: verified.identity,
        }
    }

    /// The caller's user id.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Forbidden` if the caller is not an end user.
    pub fn require_user(&self) -> Result<UserId, ApiError> {
        self.identity
            .as_user()
            .ok_or_else(|| ApiError::Forbidden("only users can do this".to_string()))
    }

    /// The caller's staff id.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Forbidden` if the caller is not a staff member.
    pub fn require_staff(&self) -> Result<StaffId, ApiError> {
        self.identity
            .as_staff()
            .ok_or_else(|| ApiError::Forbidden("only staff can do this".to_string()))
    }

    /// The caller's admin id.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Forbidden` if the caller is not an administrator.
    pub fn require_admin(&self) -> Result<AdminId, ApiError> {
        match self.identity {
            Identity::Admin(id) => Ok(id),
            _ => Err(ApiError::Forbidden("only administrators can do this".to_string())),
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl<C, V> FromRequestParts<Arc<GatewayState<C, V>>> for AuthUser
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState<C, V>>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

        let verified = state.verifier.authenticate(token).await?;
        Ok(Self::from_verified(&verified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::{Duration, Utc};

    #[test]
    fn auth_user_from_verified() {
        let verified = VerifiedIdentity {
            identity: Identity::Staff(StaffId::new(7)),
            username: Some("alice".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
        };

        let user = AuthUser::from_verified(&verified);
        assert_eq!(user.require_staff().unwrap(), StaffId::new(7));
        assert!(user.require_user().is_err());
        assert!(user.require_admin().is_err());
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }
}
