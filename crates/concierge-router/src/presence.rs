//! Presence registry.
//!
//! Tracks which identities have a live connection. The canonical binding
//! `identity → connection id` lives behind the [`PresenceStore`] trait so it can be
//! shared between instances; the handles themselves (the sending half of each socket)
//! never leave the process and are kept in a local table.
//!
//! Registering a second connection for the same identity supersedes the first
//! without closing it. Unregistering a superseded connection is a no-op.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use concierge_core::{ConnectionId, Identity, Role};
use parking_lot::RwLock;

use crate::connection::ConnectionHandle;
use crate::error::Result;
use crate::events::ServerEvent;
use crate::fanout::DeliveryReport;

/// Storage for canonical presence bindings.
#[async_trait]
pub trait PresenceStore: Send + Sync + 'static {
    /// Make `connection` canonical for `identity`; returns the binding it replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store is unavailable.
    async fn bind(&self, identity: Identity, connection: ConnectionId)
        -> Result<Option<ConnectionId>>;

    /// Remove the binding only if `connection` is still canonical.
    ///
    /// Returns `true` if a binding was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store is unavailable.
    async fn unbind(&self, identity: Identity, connection: ConnectionId) -> Result<bool>;

    /// The canonical connection of `identity`, if online.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store is unavailable.
    async fn canonical(&self, identity: Identity) -> Result<Option<ConnectionId>>;

    /// Every online identity with `role`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store is unavailable.
    async fn online(&self, role: Role) -> Result<Vec<Identity>>;
}

/// Single-process presence store.
#[derive(Debug, Default)]
pub struct MemoryPresenceStore {
    bindings: RwLock<HashMap<Identity, ConnectionId>>,
}

impl MemoryPresenceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn bind(
        &self,
        identity: Identity,
        connection: ConnectionId,
    ) -> Result<Option<ConnectionId>> {
        Ok(self.bindings.write().insert(identity, connection))
    }

    async fn unbind(&self, identity: Identity, connection: ConnectionId) -> Result<bool> {
        let mut bindings = self.bindings.write();
        if bindings.get(&identity) == Some(&connection) {
            bindings.remove(&identity);
            return Ok(true);
        }
        Ok(false)
    }

    async fn canonical(&self, identity: Identity) -> Result<Option<ConnectionId>> {
        Ok(self.bindings.read().get(&identity).copied())
    }

    async fn online(&self, role: Role) -> Result<Vec<Identity>> {
        let mut online: Vec<Identity> = self
            .bindings
            .read()
            .keys()
            .filter(|identity| identity.role() == role)
            .copied()
            .collect();
        online.sort_by_key(Identity::raw_id);
        Ok(online)
    }
}

/// Outcome of [`PresenceRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// The previously canonical connection of the same identity, now superseded.
    pub superseded: Option<ConnectionId>,
}

/// Identity → connection mapping with presence announcements.
pub struct PresenceRegistry<P: PresenceStore = MemoryPresenceStore> {
    store: Arc<P>,
    local: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
}

impl PresenceRegistry<MemoryPresenceStore> {
    /// Create a registry backed by a fresh in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPresenceStore::new()))
    }
}

impl<P: PresenceStore> PresenceRegistry<P> {
    /// Create a registry over `store`.
    #[must_use]
    pub fn new(store: Arc<P>) -> Self {
        Self {
            store,
            local: RwLock::new(HashMap::new()),
        }
    }

    /// Bind the handle's identity to it, superseding any previous connection.
    ///
    /// When the identity was not online before, an online event is sent to staff.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence store is unavailable; the handle is then
    /// not registered.
    pub async fn register(&self, handle: ConnectionHandle) -> Result<Registration> {
        let identity = handle.identity();
        let connection_id = handle.id();
        self.local.write().insert(connection_id, handle);

        let superseded = match self.store.bind(identity, connection_id).await {
            Ok(previous) => previous,
            Err(e) => {
                self.local.write().remove(&connection_id);
                return Err(e);
            }
        };

        tracing::info!(
            identity = %identity,
            connection_id = %connection_id,
            superseded = ?superseded,
            "Connection registered"
        );

        if superseded.is_none() {
            if let Some(event) = presence_event(identity, true) {
                self.announce(identity, event).await;
            }
        }

        Ok(Registration { superseded })
    }

    /// Remove the handle; a no-op when it has already been superseded.
    ///
    /// Returns `true` if the identity went offline.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence store is unavailable. The local handle is
    /// dropped regardless.
    pub async fn unregister(&self, handle: &ConnectionHandle) -> Result<bool> {
        let identity = handle.identity();
        self.local.write().remove(&handle.id());

        let removed = self.store.unbind(identity, handle.id()).await?;
        if removed {
            tracing::info!(
                identity = %identity,
                connection_id = %handle.id(),
                "Connection unregistered"
            );
            if let Some(event) = presence_event(identity, false) {
                self.announce(identity, event).await;
            }
        } else {
            tracing::debug!(
                identity = %identity,
                connection_id = %handle.id(),
                "Superseded connection closed"
            );
        }
        Ok(removed)
    }

    /// The canonical delivery target for `identity`, or `None` if offline.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence store is unavailable.
    pub async fn lookup(&self, identity: Identity) -> Result<Option<ConnectionHandle>> {
        let Some(connection_id) = self.store.canonical(identity).await? else {
            return Ok(None);
        };
        Ok(self.local.read().get(&connection_id).cloned())
    }

    /// Whether `identity` is online.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence store is unavailable.
    pub async fn is_online(&self, identity: Identity) -> Result<bool> {
        Ok(self.store.canonical(identity).await?.is_some())
    }

    /// Number of online identities with `role`.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence store is unavailable.
    pub async fn online_count(&self, role: Role) -> Result<usize> {
        Ok(self.store.online(role).await?.len())
    }

    /// Deliver `event` to every online identity with `role`, optionally skipping one.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence store is unavailable.
    pub async fn broadcast_role(
        &self,
        role: Role,
        event: &ServerEvent,
        except: Option<Identity>,
    ) -> Result<DeliveryReport> {
        let mut report = DeliveryReport::default();
        for identity in self.store.online(role).await? {
            if Some(identity) == except {
                continue;
            }
            let handle = self.lookup(identity).await?;
            report.record(handle.is_some_and(|h| h.send(event.clone())));
        }
        tracing::debug!(
            role = %role,
            event = event.name(),
            delivered = report.delivered,
            dropped = report.dropped,
            "Broadcast to role"
        );
        Ok(report)
    }

    async fn announce(&self, identity: Identity, event: ServerEvent) {
        if let Err(e) = self
            .broadcast_role(Role::Staff, &event, Some(identity))
            .await
        {
            tracing::warn!(identity = %identity, error = %e, "Presence announcement failed");
        }
    }
}

/// The event staff receive when `identity` comes online or goes offline.
fn presence_event(identity: Identity, online: bool) -> Option<ServerEvent> {
    let timestamp = Utc::now();
    match (identity, online) {
        (Identity::User(user_id), true) => Some(ServerEvent::UserOnline { user_id, timestamp }),
        (Identity::User(user_id), false) => Some(ServerEvent::UserOffline { user_id, timestamp }),
        (Identity::Staff(staff_id), true) => Some(ServerEvent::StaffOnline {
            staff_id,
            timestamp,
        }),
        (Identity::Staff(staff_id), false) => Some(ServerEvent::StaffOffline {
            staff_id,
            timestamp,
        }),
        (Identity::Admin(_), _) => None,
    }
}
