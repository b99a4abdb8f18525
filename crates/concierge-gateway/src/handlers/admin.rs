//! Administrator endpoints.
//!
//! Both endpoints reach only connected identities; nothing is queued for
//! offline recipients.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use concierge_auth::TokenVerifier;
use concierge_control::ConsultationControl;
use concierge_router::{BroadcastTarget, DeliveryReport};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::GatewayState;

/// Request to announce a message.
#[derive(Debug, Deserialize)]
pub struct BroadcastBody {
    /// Announcement text.
    pub message: String,
    /// Audience (default: everyone).
    #[serde(default = "default_target")]
    pub target: BroadcastTarget,
}

/// Request to send a notification.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyBody {
    /// Arbitrary payload.
    pub notification: serde_json::Value,
    /// Role of the recipient(s).
    pub target: BroadcastTarget,
    /// A single recipient within `target`; the whole role when absent.
    #[serde(default)]
    pub target_id: Option<u64>,
}

/// How many connections an announcement reached.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveryResponse {
    /// Connections the event was queued for.
    pub delivered: usize,
    /// Recipients that were offline.
    pub dropped: usize,
}

impl From<DeliveryReport> for DeliveryResponse {
    fn from(report: DeliveryReport) -> Self {
        Self {
            delivered: report.delivered,
            dropped: report.dropped,
        }
    }
}

const fn default_target() -> BroadcastTarget {
    BroadcastTarget::All
}

/// Announce a message to connected users, staff or everyone.
///
/// # Errors
///
/// Returns an error if the caller is not an administrator or the message is blank.
pub async fn broadcast<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Json(body): Json<BroadcastBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let admin_id = user.require_admin()?;
    let report = state
        .control
        .broadcast(admin_id, body.message, body.target)
        .await?;

    Ok(Json(DeliveryResponse::from(report)))
}

/// Send a notification to one identity or a whole role.
///
/// # Errors
///
/// Returns an error if the caller is not an administrator.
pub async fn notify<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Json(body): Json<NotifyBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let admin_id = user.require_admin()?;
    let report = state
        .control
        .notify(admin_id, body.notification, body.target, body.target_id)
        .await?;

    Ok(Json(DeliveryResponse::from(report)))
}
