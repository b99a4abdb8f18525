//! Token revocation list.
//!
//! Revoked tokens are remembered by their blake3 digest until the token would have
//! expired anyway, after which the entry is pruned.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::Result;

/// Digest under which a token is remembered.
#[must_use]
pub fn token_digest(token: &str) -> String {
    hex::encode(blake3::hash(token.as_bytes()).as_bytes())
}

/// Storage for revoked tokens.
///
/// The in-memory implementation serves a single process; a deployment with several
/// gateway instances plugs in a shared implementation here.
#[async_trait]
pub trait RevocationList: Send + Sync {
    /// Revoke `token` until `expires_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store is unavailable.
    async fn revoke(&self, token: &str, expires_at: DateTime<Utc>) -> Result<()>;

    /// Whether `token` has been revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store is unavailable.
    async fn is_revoked(&self, token: &str) -> Result<bool>;
}

/// Process-local revocation list.
#[derive(Default)]
pub struct MemoryRevocationList {
    entries: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl MemoryRevocationList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the list has no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl RevocationList for MemoryRevocationList {
    async fn revoke(&self, token: &str, expires_at: DateTime<Utc>) -> Result<()> {
        let now = Utc::now();
        let mut entries = self.entries.write();
        entries.retain(|_, until| *until > now);
        if expires_at > now {
            entries.insert(token_digest(token), expires_at);
        }
        tracing::debug!(live = entries.len(), "Token revoked");
        Ok(())
    }

    async fn is_revoked(&self, token: &str) -> Result<bool> {
        let now = Utc::now();
        Ok(self
            .entries
            .read()
            .get(&token_digest(token))
            .is_some_and(|until| *until > now))
    }
}
