//! Live connection handles.
//!
//! A [`ConnectionHandle`] is the delivery end of one authenticated transport
//! session. The transport task owns the matching receiver and forwards every event
//! it yields to the socket.

use concierge_core::{ConnectionId, Identity};
use tokio::sync::mpsc;

use crate::events::ServerEvent;

/// Sending half of one connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    identity: Identity,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    /// Create a handle for `identity` and the receiver its transport drains.
    #[must_use]
    pub fn new(identity: Identity) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = Self {
            id: ConnectionId::generate(),
            identity,
            sender,
        };
        (handle, receiver)
    }

    /// The unique id of this connection.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// The identity this connection authenticated as.
    #[must_use]
    pub const fn identity(&self) -> Identity {
        self.identity
    }

    /// Queue an event for delivery.
    ///
    /// Returns `false` if the transport side has already gone away.
    pub fn send(&self, event: ServerEvent) -> bool {
        if self.sender.send(event).is_err() {
            tracing::debug!(
                connection_id = %self.id,
                identity = %self.identity,
                "Dropping event for closed connection"
            );
            return false;
        }
        true
    }

    /// Whether the transport side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
