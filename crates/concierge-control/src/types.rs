//! Request types and configuration for consultation operations.

use std::time::Duration;

use concierge_core::{ConsultationId, StaffId};
use concierge_router::Strategy;
use concierge_store::{MessageType, Page};
use serde::{Deserialize, Serialize};

/// Request to open a consultation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConsultationRequest {
    /// A specific staff member to route to, bypassing the assignment policy.
    #[serde(default)]
    pub requested_staff_id: Option<StaffId>,
}

impl CreateConsultationRequest {
    /// Let the assignment policy pick a staff member.
    #[must_use]
    pub const fn auto() -> Self {
        Self {
            requested_staff_id: None,
        }
    }

    /// Route to a specific staff member.
    #[must_use]
    pub const fn to_staff(staff_id: StaffId) -> Self {
        Self {
            requested_staff_id: Some(staff_id),
        }
    }
}

/// Request to hand an active consultation to another staff member.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// The new assignee.
    pub target_staff_id: StaffId,
    /// Why the consultation is being handed over.
    pub reason: String,
}

/// Request to close a consultation, optionally rating it at the same time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseRequest {
    /// Why it was closed.
    #[serde(default)]
    pub reason: Option<String>,
    /// Rating from 1 to 5. Counts as the one allowed rating.
    #[serde(default)]
    pub rating: Option<u8>,
    /// Free-form feedback.
    #[serde(default)]
    pub feedback: Option<String>,
}

impl CloseRequest {
    /// Close with a reason and nothing else.
    #[must_use]
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Request to rate a closed consultation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateRequest {
    /// Rating from 1 to 5.
    pub rating: u8,
    /// Free-form feedback.
    #[serde(default)]
    pub feedback: Option<String>,
}

/// Request to send a message into a consultation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Target consultation.
    pub consultation_id: ConsultationId,
    /// Payload kind.
    #[serde(default = "default_message_type")]
    pub message_type: MessageType,
    /// Text, or a reference to uploaded media.
    pub content: String,
    /// Optional JSON object with type-specific metadata.
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

impl SendMessageRequest {
    /// A plain text message.
    #[must_use]
    pub fn text(consultation_id: ConsultationId, content: impl Into<String>) -> Self {
        Self {
            consultation_id,
            message_type: MessageType::Text,
            content: content.into(),
            extra: None,
        }
    }
}

const fn default_message_type() -> MessageType {
    MessageType::Text
}

/// Connected identities per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineStatus {
    /// Connected users.
    pub users: usize,
    /// Connected staff.
    pub staff: usize,
}

/// Configuration for the consultation service.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Strategy for automatic assignment.
    pub strategy: Strategy,
    /// Active consultations a staff member can hold before automatic assignment skips them.
    pub max_concurrent_consultations: u32,
    /// How long after sending a message its sender may recall it (seconds, inclusive).
    pub recall_window_seconds: u64,
    /// Maximum message length in characters.
    pub max_message_length: usize,
    /// Default page size for history reads.
    pub default_page_size: u32,
    /// Upper bound on the page size a caller may request.
    pub max_page_size: u32,
    /// How long an idle consultation actor lives before it is reclaimed (seconds).
    pub actor_idle_timeout_seconds: u64,
    /// Queued commands per consultation actor before callers wait.
    pub actor_mailbox: usize,
}

impl ControlConfig {
    /// The actor idle timeout as a [`Duration`].
    #[must_use]
    pub const fn actor_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.actor_idle_timeout_seconds)
    }

    /// Apply the default and maximum page size; page numbers start at 1.
    #[must_use]
    pub fn clamp_page(&self, page: Page) -> Page {
        let limit = if page.limit == 0 {
            self.default_page_size
        } else {
            page.limit.min(self.max_page_size)
        };
        Page {
            page: page.page.max(1),
            limit,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::LeastBusy,
            max_concurrent_consultations: 10,
            recall_window_seconds: 120, // 2 minutes
            max_message_length: 5000,
            default_page_size: 50,
            max_page_size: 100,
            actor_idle_timeout_seconds: 300,
            actor_mailbox: 64,
        }
    }
}
