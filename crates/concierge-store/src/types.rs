//! Domain types stored in the database.
//!
//! These types represent the persisted state of consultations, messages and staff.
//! They serialize as camelCase so the same structs can be sent over the wire.

use chrono::{DateTime, Utc};
use concierge_core::{ConsultationId, Identity, MessageId, Role, StaffId, StaffStatus, UserId};
use serde::{Deserialize, Serialize};

/// Lifecycle states for a consultation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    /// Created without a staff member; waiting to be accepted.
    Waiting,
    /// Assigned to exactly one staff member.
    Active,
    /// Terminal.
    Closed,
}

impl ConsultationStatus {
    /// Whether the consultation still counts against the one-per-user limit.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Waiting | Self::Active)
    }
}

impl std::fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Closed => "closed",
        })
    }
}

/// One hand-off between staff members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    /// Staff member the consultation was taken from.
    pub from_staff_id: Option<StaffId>,
    /// Staff member the consultation was handed to.
    pub to_staff_id: StaffId,
    /// Free-form reason given by the transferring staff.
    pub reason: String,
    /// When the transfer happened.
    pub transferred_at: DateTime<Utc>,
}

/// A consultation record stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consultation {
    /// Store-assigned identifier.
    pub id: ConsultationId,
    /// The user who opened the consultation.
    pub user_id: UserId,
    /// Currently assigned staff member, if any.
    pub staff_id: Option<StaffId>,
    /// Current lifecycle state.
    pub status: ConsultationStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// When a staff member was first assigned.
    pub accepted_at: Option<DateTime<Utc>>,
    /// When the consultation was closed.
    pub closed_at: Option<DateTime<Utc>>,
    /// Reason given at close time.
    pub close_reason: Option<String>,
    /// Role of whoever closed the consultation.
    pub closed_by: Option<Role>,
    /// Satisfaction rating, 1 to 5.
    pub rating: Option<u8>,
    /// Free-form feedback attached with the rating.
    pub feedback: Option<String>,
    /// Every staff hand-off, oldest first.
    #[serde(default)]
    pub transfer_history: Vec<TransferRecord>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a consultation; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewConsultation {
    /// The requesting user.
    pub user_id: UserId,
    /// Resolved staff member, if any.
    pub staff_id: Option<StaffId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl NewConsultation {
    /// Materialize the record with its assigned id.
    ///
    /// Status is `Active` when a staff member was resolved, otherwise `Waiting`.
    #[must_use]
    pub fn into_consultation(self, id: ConsultationId) -> Consultation {
        let status = if self.staff_id.is_some() {
            ConsultationStatus::Active
        } else {
            ConsultationStatus::Waiting
        };
        Consultation {
            id,
            user_id: self.user_id,
            staff_id: self.staff_id,
            status,
            created_at: self.created_at,
            accepted_at: self.staff_id.map(|_| self.created_at),
            closed_at: None,
            close_reason: None,
            closed_by: None,
            rating: None,
            feedback: None,
            transfer_history: Vec::new(),
            updated_at: self.created_at,
        }
    }
}

/// Kinds of message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Plain text.
    Text,
    /// Image reference.
    Image,
    /// File reference.
    File,
    /// Audio clip reference.
    Audio,
    /// Video reference.
    Video,
    /// Shared location.
    Location,
    /// Generated by the platform, not a participant.
    System,
}

/// Delivery-independent state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Visible.
    Sent,
    /// Withdrawn by its sender within the recall window.
    Recalled,
    /// Soft-deleted by its sender.
    Deleted,
}

/// A message record stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Store-assigned identifier.
    pub id: MessageId,
    /// Owning consultation.
    pub consultation_id: ConsultationId,
    /// Author; `None` for system messages.
    pub sender: Option<Identity>,
    /// Content kind.
    pub message_type: MessageType,
    /// Text body or media reference.
    pub content: String,
    /// Optional structured payload (dimensions, coordinates, file names).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
    /// Commit timestamp.
    pub created_at: DateTime<Utc>,
    /// Current state.
    pub status: MessageStatus,
    /// When the counterpart read the message.
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Role of the author, `None` for system messages.
    #[must_use]
    pub fn sender_role(&self) -> Option<Role> {
        self.sender.as_ref().map(Identity::role)
    }

    /// Whether a reader in `role` would count this message as unread.
    ///
    /// System messages are never unread.
    #[must_use]
    pub fn is_unread_for(&self, role: Role) -> bool {
        self.read_at.is_none()
            && self.status == MessageStatus::Sent
            && self.sender_role().is_some_and(|sender| sender != role)
    }
}

/// Fields supplied when committing a message; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Owning consultation.
    pub consultation_id: ConsultationId,
    /// Author; `None` for system messages.
    pub sender: Option<Identity>,
    /// Content kind.
    pub message_type: MessageType,
    /// Text body or media reference.
    pub content: String,
    /// Optional structured payload.
    pub extra: Option<serde_json::Value>,
    /// Commit timestamp.
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    /// A platform-generated text message.
    #[must_use]
    pub fn system(consultation_id: ConsultationId, content: impl Into<String>) -> Self {
        Self {
            consultation_id,
            sender: None,
            message_type: MessageType::System,
            content: content.into(),
            extra: None,
            created_at: Utc::now(),
        }
    }

    /// Materialize the record with its assigned id.
    #[must_use]
    pub fn into_message(self, id: MessageId) -> Message {
        Message {
            id,
            consultation_id: self.consultation_id,
            sender: self.sender,
            message_type: self.message_type,
            content: self.content,
            extra: self.extra,
            created_at: self.created_at,
            status: MessageStatus::Sent,
            read_at: None,
        }
    }
}

/// A 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Page number, starting at 1.
    pub page: u32,
    /// Maximum records per page.
    pub limit: u32,
}

impl Page {
    /// Number of records to skip.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1) as usize * self.limit as usize
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { page: 1, limit: 50 }
    }
}

/// One page of a consultation's message history, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    /// Messages on this page.
    pub messages: Vec<Message>,
    /// Total messages in the consultation.
    pub total: u64,
    /// The page that was requested.
    pub page: u32,
    /// The limit that was applied.
    pub limit: u32,
}

/// Filter for [`crate::Store::list_consultations`]. Unset fields match anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsultationFilter {
    /// Only consultations in this state.
    pub status: Option<ConsultationStatus>,
    /// Only consultations opened by this user.
    pub user_id: Option<UserId>,
    /// Only consultations assigned to this staff member.
    pub staff_id: Option<StaffId>,
}

impl ConsultationFilter {
    /// Whether `consultation` passes this filter.
    #[must_use]
    pub fn matches(&self, consultation: &Consultation) -> bool {
        self.status.map_or(true, |s| consultation.status == s)
            && self.user_id.map_or(true, |u| consultation.user_id == u)
            && self.staff_id.map_or(true, |s| consultation.staff_id == Some(s))
    }
}

/// One page of consultations, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationPage {
    /// Consultations on this page.
    pub consultations: Vec<Consultation>,
    /// Total consultations matching the filter.
    pub total: u64,
    /// The page that was requested.
    pub page: u32,
    /// The limit that was applied.
    pub limit: u32,
}

/// A staff record stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Staff {
    /// Identifier.
    pub id: StaffId,
    /// Display name, used in system messages.
    pub name: String,
    /// Current availability.
    pub status: StaffStatus,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Filter for [`crate::Store::get_available_staff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffFilter {
    /// Accepted statuses.
    pub statuses: Vec<StaffStatus>,
    /// Staff member to leave out, typically the current assignee.
    pub exclude: Option<StaffId>,
}

impl StaffFilter {
    /// Staff eligible for automatic assignment.
    #[must_use]
    pub fn assignable() -> Self {
        Self {
            statuses: vec![StaffStatus::Online],
            exclude: None,
        }
    }

    /// Staff that can be explicitly targeted.
    #[must_use]
    pub fn reachable() -> Self {
        Self {
            statuses: vec![StaffStatus::Online, StaffStatus::Busy],
            exclude: None,
        }
    }

    /// Leave one staff member out of the result.
    #[must_use]
    pub const fn excluding(mut self, staff_id: StaffId) -> Self {
        self.exclude = Some(staff_id);
        self
    }

    /// Whether `staff` passes this filter.
    #[must_use]
    pub fn matches(&self, staff: &Staff) -> bool {
        self.statuses.contains(&staff.status) && self.exclude != Some(staff.id)
    }
}
