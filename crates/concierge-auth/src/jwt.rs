//! JWT verification and identity extraction.
//!
//! Tokens are HS256-signed with a shared secret and carry the numeric id and role
//! of the caller:
//!
//! ```json
//! { "userId": 42, "userType": "staff", "username": "alice", "exp": 1700000000, "iat": 1699990000 }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use concierge_core::{Identity, Role};

use crate::error::{AuthError, Result};
use crate::revocation::RevocationList;
use crate::AuthConfig;

/// The outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Who the caller is.
    pub identity: Identity,
    /// Display name, if the token carried one.
    pub username: Option<String>,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
}

/// Trait for verifying bearer credentials.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Check signature and expiry and extract the identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, expired or badly signed.
    async fn verify(&self, credential: &str) -> Result<VerifiedIdentity>;

    /// Whether the credential has been revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the revocation list is unavailable.
    async fn is_revoked(&self, credential: &str) -> Result<bool>;

    /// Revoke a valid credential for the rest of its lifetime.
    ///
    /// # Errors
    ///
    /// Returns a verification error if the credential is not valid, or an error
    /// if the revocation list is unavailable.
    async fn revoke(&self, credential: &str) -> Result<()>;

    /// Verify the credential and reject it if revoked.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Revoked` for revoked tokens, or any verification error.
    async fn authenticate(&self, credential: &str) -> Result<VerifiedIdentity> {
        let verified = self.verify(credential).await?;
        if self.is_revoked(credential).await? {
            return Err(AuthError::Revoked);
        }
        Ok(verified)
    }
}

/// Claims carried by a concierge token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Numeric id of the caller within its role.
    pub user_id: u64,
    /// One of `user`, `staff`, `admin`.
    pub user_type: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Issuer, checked when configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Expiration timestamp.
    pub exp: u64,
    /// Issued-at timestamp.
    pub iat: u64,
}

/// Shared-secret (HS256) verifier backed by a revocation list.
pub struct HmacVerifier<R> {
    config: AuthConfig,
    decoding: DecodingKey,
    encoding: EncodingKey,
    revocations: Arc<R>,
}

impl<R: RevocationList> HmacVerifier<R> {
    /// Create a verifier for the configured secret.
    #[must_use]
    pub fn new(config: AuthConfig, revocations: Arc<R>) -> Self {
        let decoding = DecodingKey::from_secret(config.secret.as_bytes());
        let encoding = EncodingKey::from_secret(config.secret.as_bytes());
        Self {
            config,
            decoding,
            encoding,
            revocations,
        }
    }

    /// The revocation list consulted by this verifier.
    #[must_use]
    pub fn revocations(&self) -> &Arc<R> {
        &self.revocations
    }

    /// Sign a token for `identity`, valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn issue(
        &self,
        identity: Identity,
        username: Option<String>,
        ttl: chrono::Duration,
    ) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            user_id: identity.raw_id(),
            user_type: identity.role().as_str().to_string(),
            username,
            iss: self.config.issuer.clone(),
            exp: u64::try_from((now + ttl).timestamp()).unwrap_or(0),
            iat: u64::try_from(now.timestamp()).unwrap_or(0),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(e.to_string()))
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.config.leeway_seconds;
        validation.validate_exp = true;
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("exp".to_string());
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }
        validation
    }
}

#[async_trait]
impl<R: RevocationList + 'static> TokenVerifier for HmacVerifier<R> {
    async fn verify(&self, credential: &str) -> Result<VerifiedIdentity> {
        let token_data = decode::<Claims>(credential, &self.decoding, &self.validation())
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken(e.to_string()),
            })?;

        let claims = token_data.claims;
        let role: Role = claims
            .user_type
            .parse()
            .map_err(|_| AuthError::UnknownRole(claims.user_type.clone()))?;

        let exp_secs = i64::try_from(claims.exp).unwrap_or(i64::MAX);
        let expires_at = DateTime::from_timestamp(exp_secs, 0)
            .ok_or_else(|| AuthError::InvalidToken("invalid exp timestamp".to_string()))?;

        Ok(VerifiedIdentity {
            identity: Identity::from_parts(role, claims.user_id),
            username: claims.username,
            expires_at,
        })
    }

    async fn is_revoked(&self, credential: &str) -> Result<bool> {
        self.revocations.is_revoked(credential).await
    }

    async fn revoke(&self, credential: &str) -> Result<()> {
        let verified = self.verify(credential).await?;
        self.revocations
            .revoke(credential, verified.expires_at)
            .await
    }
}

/// A mock verifier for testing.
///
/// Accepts tokens of the form `test-token:<role>:<id>`, e.g. `test-token:staff:7`.
/// Tokens listed in `revoked` verify but report as revoked.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Default)]
pub struct MockTokenVerifier {
    /// Tokens that `is_revoked` reports as revoked.
    pub revoked: parking_lot::RwLock<std::collections::HashSet<String>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockTokenVerifier {
    /// Build a token for `identity`.
    #[must_use]
    pub fn token_for(identity: Identity) -> String {
        format!("test-token:{}:{}", identity.role(), identity.raw_id())
    }

    /// Mark a token as revoked.
    pub fn revoke(&self, token: &str) {
        self.revoked.write().insert(token.to_string());
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl TokenVerifier for MockTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<VerifiedIdentity> {
        let rest = credential.strip_prefix("test-token:").ok_or_else(|| {
            AuthError::InvalidToken("expected test-token:<role>:<id>".to_string())
        })?;

        let (role, id) = rest.split_once(':').ok_or_else(|| {
            AuthError::InvalidToken("expected test-token:<role>:<id>".to_string())
        })?;
        let role: Role = role
            .parse()
            .map_err(|_| AuthError::UnknownRole(role.to_string()))?;
        let id: u64 = id
            .parse()
            .map_err(|_| AuthError::InvalidToken(format!("invalid id: {id}")))?;

        Ok(VerifiedIdentity {
            identity: Identity::from_parts(role, id),
            username: None,
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }

    async fn is_revoked(&self, credential: &str) -> Result<bool> {
        Ok(self.revoked.read().contains(credential))
    }

    async fn revoke(&self, credential: &str) -> Result<()> {
        self.verify(credential).await?;
        self.revoked.write().insert(credential.to_string());
        Ok(())
    }
}
