//! Message and event fan-out.
//!
//! Given a consultation's current participants and an event, compute who should
//! receive it and push it to whichever of them are online. Offline recipients are
//! skipped; nothing is queued for later. Durable history is the only backstop.
//!
//! Callers serialize `publish` per consultation, so each recipient observes that
//! consultation's events in publish order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use concierge_core::{ConsultationId, Identity, StaffId, UserId};
use concierge_store::Consultation;
use parking_lot::RwLock;

use crate::events::ServerEvent;
use crate::presence::{MemoryPresenceStore, PresenceRegistry, PresenceStore};

/// Who an event is addressed to, relative to its sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Only the other party of the conversation (typing, read receipts).
    Counterpart,
    /// Everyone in the consultation channel except the sender (messages, state changes).
    Room,
}

/// The parties of one consultation at the time of publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participants {
    /// The consultation.
    pub consultation_id: ConsultationId,
    /// Its owner.
    pub user_id: UserId,
    /// Its current assignee.
    pub staff_id: Option<StaffId>,
}

impl From<&Consultation> for Participants {
    fn from(consultation: &Consultation) -> Self {
        Self {
            consultation_id: consultation.id,
            user_id: consultation.user_id,
            staff_id: consultation.staff_id,
        }
    }
}

impl Participants {
    /// Whether `identity` is the owner or the current assignee.
    #[must_use]
    pub fn includes(&self, identity: Identity) -> bool {
        match identity {
            Identity::User(id) => id == self.user_id,
            Identity::Staff(id) => Some(id) == self.staff_id,
            Identity::Admin(_) => false,
        }
    }

    fn parties(&self) -> impl Iterator<Item = Identity> {
        std::iter::once(Identity::User(self.user_id)).chain(self.staff_id.map(Identity::Staff))
    }
}

/// Compute the recipient set of an event.
///
/// `observers` are other identities subscribed to the consultation channel; only
/// administrators among them are considered, and only for [`Audience::Room`].
#[must_use]
pub fn recipients(
    participants: &Participants,
    observers: &[Identity],
    sender: Option<Identity>,
    audience: Audience,
) -> Vec<Identity> {
    let mut out: Vec<Identity> = match (audience, sender) {
        (Audience::Counterpart, Some(Identity::User(id))) if id == participants.user_id => {
            participants.staff_id.map(Identity::Staff).into_iter().collect()
        }
        (Audience::Counterpart, Some(Identity::Staff(id))) if Some(id) == participants.staff_id => {
            vec![Identity::User(participants.user_id)]
        }
        (Audience::Counterpart, _) => participants.parties().collect(),
        (Audience::Room, _) => participants
            .parties()
            .chain(observers.iter().copied().filter(Identity::is_admin))
            .collect(),
    };
    out.retain(|identity| Some(*identity) != sender);
    out.dedup();
    out
}

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipients the event was queued for.
    pub delivered: usize,
    /// Recipients that were offline or whose connection had closed.
    pub dropped: usize,
}

impl DeliveryReport {
    /// Count one delivery attempt.
    pub fn record(&mut self, delivered: bool) {
        if delivered {
            self.delivered += 1;
        } else {
            self.dropped += 1;
        }
    }
}

/// Routes consultation events to connected recipients.
pub struct FanoutRouter<P: PresenceStore = MemoryPresenceStore> {
    presence: Arc<PresenceRegistry<P>>,
    channels: RwLock<HashMap<ConsultationId, HashSet<Identity>>>,
}

impl<P: PresenceStore> FanoutRouter<P> {
    /// Create a router delivering through `presence`.
    #[must_use]
    pub fn new(presence: Arc<PresenceRegistry<P>>) -> Self {
        Self {
            presence,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// The presence registry used for delivery.
    #[must_use]
    pub const fn presence(&self) -> &Arc<PresenceRegistry<P>> {
        &self.presence
    }

    /// Subscribe `identity` to a consultation channel.
    ///
    /// Returns `false` if it was already subscribed.
    pub fn join(&self, consultation_id: ConsultationId, identity: Identity) -> bool {
        let joined = self
            .channels
            .write()
            .entry(consultation_id)
            .or_default()
            .insert(identity);
        tracing::debug!(
            consultation_id = %consultation_id,
            identity = %identity,
            joined,
            "Joined consultation channel"
        );
        joined
    }

    /// Unsubscribe `identity` from a consultation channel.
    ///
    /// Returns `false` if it was not subscribed.
    pub fn leave(&self, consultation_id: ConsultationId, identity: Identity) -> bool {
        let mut channels = self.channels.write();
        let Some(members) = channels.get_mut(&consultation_id) else {
            return false;
        };
        let left = members.remove(&identity);
        if members.is_empty() {
            channels.remove(&consultation_id);
        }
        left
    }

    /// Unsubscribe `identity` from every channel; returns the channels it left.
    pub fn leave_all(&self, identity: Identity) -> Vec<ConsultationId> {
        let mut channels = self.channels.write();
        let mut left = Vec::new();
        for (consultation_id, members) in channels.iter_mut() {
            if members.remove(&identity) {
                left.push(*consultation_id);
            }
        }
        channels.retain(|_, members| !members.is_empty());
        left
    }

    /// Current subscribers of a consultation channel.
    #[must_use]
    pub fn members(&self, consultation_id: ConsultationId) -> Vec<Identity> {
        self.channels
            .read()
            .get(&consultation_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop a closed consultation's channel.
    pub fn close_channel(&self, consultation_id: ConsultationId) {
        self.channels.write().remove(&consultation_id);
    }

    /// Publish `event` about a consultation to its recipients.
    pub async fn publish(
        &self,
        participants: &Participants,
        sender: Option<Identity>,
        audience: Audience,
        event: ServerEvent,
    ) -> DeliveryReport {
        let observers = self.members(participants.consultation_id);
        let targets = recipients(participants, &observers, sender, audience);

        let mut report = DeliveryReport::default();
        for target in targets {
            report.record(self.deliver(target, event.clone()).await);
        }

        tracing::debug!(
            consultation_id = %participants.consultation_id,
            event = event.name(),
            delivered = report.delivered,
            dropped = report.dropped,
            "Published consultation event"
        );
        report
    }

    /// Deliver `event` to the canonical connection of `identity`, if any.
    ///
    /// Returns `false` when the identity is offline.
    pub async fn deliver(&self, identity: Identity, event: ServerEvent) -> bool {
        match self.presence.lookup(identity).await {
            Ok(Some(handle)) => handle.send(event),
            Ok(None) => {
                tracing::debug!(identity = %identity, event = event.name(), "Recipient offline, dropping");
                false
            }
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "Presence lookup failed, dropping");
                false
            }
        }
    }
}
