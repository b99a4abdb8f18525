//! Server-to-client event vocabulary.
//!
//! Every frame pushed to a connection is one [`ServerEvent`], serialized as a JSON
//! object whose `event` field names the variant in camelCase.

use chrono::{DateTime, Utc};
use concierge_core::{ConsultationId, Identity, MessageId, Role, StaffId, StaffStatus, UserId};
use concierge_store::{Consultation, Message};
use serde::{Deserialize, Serialize};

/// Audience of an admin broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastTarget {
    /// Every connected user and staff member.
    All,
    /// Connected users only.
    Users,
    /// Connected staff only.
    Staff,
}

/// Events sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    // =========================================================================
    // Connection
    // =========================================================================
    /// Authentication succeeded; the connection is now registered.
    Authenticated {
        /// Who the connection is bound to.
        identity: Identity,
    },

    /// Reply to an application-level `ping`.
    Pong {
        /// Server time.
        timestamp: DateTime<Utc>,
    },

    /// Reply to `getOnlineStatus`.
    OnlineStatus {
        /// Connected users.
        users: usize,
        /// Connected staff.
        staff: usize,
        /// Server time.
        timestamp: DateTime<Utc>,
    },

    /// An operation failed; sent only to the invoking connection.
    Error {
        /// Stable machine-readable code.
        code: String,
        /// Human-readable description.
        message: String,
        /// The operation that failed, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        op: Option<String>,
    },

    /// An operation succeeded; sent only to the invoking connection.
    Ack {
        /// The operation that succeeded.
        op: String,
        /// Operation result, e.g. the updated consultation.
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        data: serde_json::Value,
    },

    // =========================================================================
    // Presence
    // =========================================================================
    /// A user connected.
    UserOnline {
        /// The user.
        user_id: UserId,
        /// When.
        timestamp: DateTime<Utc>,
    },

    /// A user's canonical connection went away.
    UserOffline {
        /// The user.
        user_id: UserId,
        /// When.
        timestamp: DateTime<Utc>,
    },

    /// A staff member connected.
    StaffOnline {
        /// The staff member.
        staff_id: StaffId,
        /// When.
        timestamp: DateTime<Utc>,
    },

    /// A staff member's canonical connection went away.
    StaffOffline {
        /// The staff member.
        staff_id: StaffId,
        /// When.
        timestamp: DateTime<Utc>,
    },

    /// A staff member changed availability.
    StaffStatusChanged {
        /// The staff member.
        staff_id: StaffId,
        /// New availability.
        status: StaffStatus,
        /// When.
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Consultation membership
    // =========================================================================
    /// Acknowledges `joinConsultation`.
    Joined {
        /// Current state of the joined consultation.
        consultation: Consultation,
    },

    /// Another participant joined the consultation channel.
    UserJoined {
        /// The consultation.
        consultation_id: ConsultationId,
        /// Who joined.
        identity: Identity,
    },

    /// Another participant left the consultation channel.
    UserLeft {
        /// The consultation.
        consultation_id: ConsultationId,
        /// Who left.
        identity: Identity,
    },

    // =========================================================================
    // Consultation lifecycle
    // =========================================================================
    /// A consultation was assigned to the receiving staff member on creation.
    NewConsultation {
        /// The consultation.
        consultation: Consultation,
    },

    /// A consultation is waiting for any staff member to accept it.
    ConsultationWaiting {
        /// The consultation.
        consultation: Consultation,
    },

    /// A staff member accepted the consultation.
    StaffJoined {
        /// The consultation after acceptance.
        consultation: Consultation,
        /// The accepting staff member.
        staff_id: StaffId,
    },

    /// The consultation was handed to the receiving staff member.
    ConsultationTransferred {
        /// The consultation after the transfer.
        consultation: Consultation,
        /// Previous assignee.
        from_staff_id: Option<StaffId>,
        /// Reason given by the previous assignee.
        reason: String,
    },

    /// The consultation is being handed to another staff member.
    ConsultationTransferring {
        /// The consultation after the transfer.
        consultation_id: ConsultationId,
        /// Previous assignee.
        from_staff_id: Option<StaffId>,
        /// New assignee.
        to_staff_id: StaffId,
        /// Reason given by the previous assignee.
        reason: String,
    },

    /// The consultation was closed.
    ConsultationClosed {
        /// The consultation after closing.
        consultation: Consultation,
        /// Role of the closer.
        closed_by: Role,
        /// Reason given.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    // =========================================================================
    // Messages
    // =========================================================================
    /// A committed message, carrying its store-assigned id.
    NewMessage {
        /// The message.
        message: Message,
    },

    /// Acknowledges `sendMessage` to its sender once the message is committed.
    MessageSent {
        /// The message.
        message: Message,
        /// Client-side correlation id echoed back, if one was supplied.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
    },

    /// A message was recalled by its sender.
    MessageRecalled {
        /// The consultation.
        consultation_id: ConsultationId,
        /// The recalled message.
        message_id: MessageId,
        /// The sender who recalled it.
        recalled_by: Identity,
    },

    /// The counterpart is typing.
    UserTyping {
        /// The consultation.
        consultation_id: ConsultationId,
        /// Who is typing.
        from: Identity,
    },

    /// The counterpart stopped typing.
    UserStoppedTyping {
        /// The consultation.
        consultation_id: ConsultationId,
        /// Who stopped typing.
        from: Identity,
    },

    /// The counterpart read messages.
    MessagesRead {
        /// The consultation.
        consultation_id: ConsultationId,
        /// Who read them.
        reader: Identity,
        /// Messages that changed to read.
        message_ids: Vec<MessageId>,
        /// When.
        read_at: DateTime<Utc>,
    },

    // =========================================================================
    // Administration
    // =========================================================================
    /// Admin announcement.
    SystemBroadcast {
        /// Announcement text.
        message: String,
        /// The sending admin.
        from: Identity,
        /// When.
        timestamp: DateTime<Utc>,
    },

    /// Targeted admin notification.
    SystemNotification {
        /// Arbitrary notification payload.
        notification: serde_json::Value,
        /// The sending admin.
        from: Identity,
        /// When.
        timestamp: DateTime<Utc>,
    },
}

impl ServerEvent {
    /// The wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Authenticated { .. } => "authenticated",
            Self::Pong { .. } => "pong",
            Self::OnlineStatus { .. } => "onlineStatus",
            Self::Error { .. } => "error",
            Self::Ack { .. } => "ack",
            Self::UserOnline { .. } => "userOnline",
            Self::UserOffline { .. } => "userOffline",
            Self::StaffOnline { .. } => "staffOnline",
            Self::StaffOffline { .. } => "staffOffline",
            Self::StaffStatusChanged { .. } => "staffStatusChanged",
            Self::Joined { .. } => "joined",
            Self::UserJoined { .. } => "userJoined",
            Self::UserLeft { .. } => "userLeft",
            Self::NewConsultation { .. } => "newConsultation",
            Self::ConsultationWaiting { .. } => "consultationWaiting",
            Self::StaffJoined { .. } => "staffJoined",
            Self::ConsultationTransferred { .. } => "consultationTransferred",
            Self::ConsultationTransferring { .. } => "consultationTransferring",
            Self::ConsultationClosed { .. } => "consultationClosed",
            Self::NewMessage { .. } => "newMessage",
            Self::MessageSent { .. } => "messageSent",
            Self::MessageRecalled { .. } => "messageRecalled",
            Self::UserTyping { .. } => "userTyping",
            Self::UserStoppedTyping { .. } => "userStoppedTyping",
            Self::MessagesRead { .. } => "messagesRead",
            Self::SystemBroadcast { .. } => "systemBroadcast",
            Self::SystemNotification { .. } => "systemNotification",
        }
    }

    /// Build an error event.
    #[must_use]
    pub fn error(code: &str, message: impl Into<String>, op: Option<&str>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
            op: op.map(str::to_string),
        }
    }

    /// Build an acknowledgement for `op`.
    #[must_use]
    pub fn ack(op: &str, data: serde_json::Value) -> Self {
        Self::Ack {
            op: op.to_string(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_in_camel_case() {
        let event = ServerEvent::UserTyping {
            consultation_id: ConsultationId::new(4),
            from: Identity::User(UserId::new(1)),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "userTyping");
        assert_eq!(json["consultationId"], 4);
        assert_eq!(json["from"]["role"], "user");
        assert_eq!(event.name(), "userTyping");
    }

    #[test]
    fn error_event_omits_missing_op() {
        let json = serde_json::to_value(ServerEvent::error("not_found", "gone", None)).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["code"], "not_found");
        assert!(json.get("op").is_none());
    }

    #[test]
    fn ack_without_data_is_bare() {
        let json = serde_json::to_value(ServerEvent::ack("leaveConsultation", serde_json::Value::Null))
            .unwrap();
        assert_eq!(json, serde_json::json!({"event": "ack", "op": "leaveConsultation"}));
    }

    #[test]
    fn events_parse_back() {
        let event = ServerEvent::StaffStatusChanged {
            staff_id: StaffId::new(2),
            status: StaffStatus::Busy,
            timestamp: Utc::now(),
        };
        let text = serde_json::to_string(&event).unwrap();
        let parsed: ServerEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, event);
    }
}
