//! Consultation endpoints.
//!
//! REST access to the same lifecycle the WebSocket operations drive. Every
//! transition goes through [`ConsultationControl`], so events reach connected
//! participants no matter which surface triggered them.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use concierge_auth::TokenVerifier;
use concierge_control::{
    CloseRequest, Consultation, ConsultationControl, ConsultationId, ConsultationStatus,
    ControlError, CreateConsultationRequest, MessageId, RateRequest, StaffId, TransferRequest,
    UserId,
};
use concierge_store::{ConsultationFilter, Page};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::handlers::parse_id;
use crate::state::GatewayState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Response for consultation creation.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateConsultationResponse {
    /// The new consultation, or the caller's already open one.
    pub consultation: Consultation,
    /// Whether `consultation` already existed.
    pub existing: bool,
}

/// Query parameters for history reads.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// 1-based page number (default: 1).
    #[serde(default)]
    pub page: Option<u32>,
    /// Page size; the server default applies when absent.
    #[serde(default)]
    pub limit: Option<u32>,
}

impl HistoryQuery {
    fn into_page(self) -> Page {
        Page {
            page: self.page.unwrap_or(1),
            limit: self.limit.unwrap_or(0),
        }
    }
}

/// Query parameters for consultation listings.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// 1-based page number (default: 1).
    #[serde(default)]
    pub page: Option<u32>,
    /// Page size; the server default applies when absent.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Only consultations in this state.
    #[serde(default)]
    pub status: Option<ConsultationStatus>,
    /// Only consultations of this user (staff and admins).
    #[serde(default)]
    pub user_id: Option<u64>,
    /// Only consultations assigned to this staff member (admins).
    #[serde(default)]
    pub staff_id: Option<u64>,
}

impl ListQuery {
    fn into_parts(self) -> (ConsultationFilter, Page) {
        let filter = ConsultationFilter {
            status: self.status,
            user_id: self.user_id.map(UserId::new),
            staff_id: self.staff_id.map(StaffId::new),
        };
        let page = HistoryQuery {
            page: self.page,
            limit: self.limit,
        }
        .into_page();
        (filter, page)
    }
}

/// Request to mark messages as read.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadBody {
    /// Specific messages; every unread message when absent.
    #[serde(default)]
    pub message_ids: Option<Vec<MessageId>>,
}

/// Response for read receipts.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    /// Messages that changed to read.
    pub message_ids: Vec<MessageId>,
}

/// Response for the unread counter.
#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadResponse {
    /// Unread messages from the counterpart.
    pub count: u32,
}

// =============================================================================
// Handlers
// =============================================================================

/// Open a consultation for the authenticated user.
///
/// A user who already has an open consultation gets it back with
/// `existing: true` instead of an error.
///
/// # Errors
///
/// Returns an error if the caller is not a user, the requested staff member
/// is not reachable, or the service fails.
pub async fn create_consultation<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Json(body): Json<CreateConsultationRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let user_id = user.require_user()?;

    match state.control.create_consultation(user_id, body).await {
        Ok(consultation) => Ok((
            StatusCode::CREATED,
            Json(CreateConsultationResponse {
                consultation,
                existing: false,
            }),
        )),
        Err(ControlError::Conflict { existing }) => Ok((
            StatusCode::OK,
            Json(CreateConsultationResponse {
                consultation: *existing,
                existing: true,
            }),
        )),
        Err(e) => Err(e.into()),
    }
}

/// List consultations visible to the caller, newest first.
///
/// Staff pass `status=waiting` to see the queue of unassigned consultations.
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn list_consultations<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let (filter, page) = query.into_parts();
    let listed = state
        .control
        .list_consultations(user.identity, filter, page)
        .await?;

    Ok(Json(listed))
}

/// Get a single consultation by ID.
///
/// # Errors
///
/// Returns an error if the consultation is not found or the caller may not see it.
pub async fn get_consultation<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(consultation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let consultation_id: ConsultationId = parse_id("consultation", &consultation_id)?;
    let consultation = state
        .control
        .get_consultation(user.identity, consultation_id)
        .await?;

    Ok(Json(consultation))
}

/// Accept a waiting consultation.
///
/// # Errors
///
/// Returns an error if the caller is not staff or the consultation is no
/// longer waiting.
pub async fn accept_consultation<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(consultation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let staff_id = user.require_staff()?;
    let consultation_id: ConsultationId = parse_id("consultation", &consultation_id)?;
    let consultation = state
        .control
        .accept_consultation(staff_id, consultation_id)
        .await?;

    Ok(Json(consultation))
}

/// Hand an active consultation to another staff member.
///
/// # Errors
///
/// Returns an error if the caller is not staff, the consultation is not
/// active, or the target is unreachable.
pub async fn transfer_consultation<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(consultation_id): Path<String>,
    Json(body): Json<TransferRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    user.require_staff()?;
    let consultation_id: ConsultationId = parse_id("consultation", &consultation_id)?;
    let consultation = state
        .control
        .transfer_consultation(user.identity, consultation_id, body)
        .await?;

    Ok(Json(consultation))
}

/// Close a consultation.
///
/// # Errors
///
/// Returns an error if the consultation is already closed or the caller is
/// not one of its participants.
pub async fn close_consultation<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(consultation_id): Path<String>,
    Json(body): Json<CloseRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let consultation_id: ConsultationId = parse_id("consultation", &consultation_id)?;
    let consultation = state
        .control
        .close_consultation(user.identity, consultation_id, body)
        .await?;

    Ok(Json(consultation))
}

/// Rate a closed consultation.
///
/// # Errors
///
/// Returns an error if the caller is not the owner, the consultation is not
/// closed, or it was already rated.
pub async fn rate_consultation<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(consultation_id): Path<String>,
    Json(body): Json<RateRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let user_id = user.require_user()?;
    let consultation_id: ConsultationId = parse_id("consultation", &consultation_id)?;
    let consultation = state
        .control
        .rate_consultation(user_id, consultation_id, body)
        .await?;

    Ok(Json(consultation))
}

/// Read a page of a consultation's messages, oldest first.
///
/// # Errors
///
/// Returns an error if the caller may not see the consultation.
pub async fn list_messages<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(consultation_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let consultation_id: ConsultationId = parse_id("consultation", &consultation_id)?;
    let page = state
        .control
        .message_history(user.identity, consultation_id, query.into_page())
        .await?;

    Ok(Json(page))
}

/// Mark messages from the counterpart as read.
///
/// # Errors
///
/// Returns an error if the caller is not a participant.
pub async fn mark_read<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(consultation_id): Path<String>,
    Json(body): Json<MarkReadBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let consultation_id: ConsultationId = parse_id("consultation", &consultation_id)?;
    let message_ids = state
        .control
        .mark_read(user.identity, consultation_id, body.message_ids)
        .await?;

    Ok(Json(MarkReadResponse { message_ids }))
}

/// Count unread messages from the counterpart.
///
/// # Errors
///
/// Returns an error if the caller is not a participant.
pub async fn unread_count<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(consultation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let consultation_id: ConsultationId = parse_id("consultation", &consultation_id)?;
    let count = state
        .control
        .unread_count(user.identity, consultation_id)
        .await?;

    Ok(Json(UnreadResponse { count }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_query_defaults() {
        let page = HistoryQuery::default().into_page();
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, 0);

        let page = HistoryQuery {
            page: Some(3),
            limit: Some(20),
        }
        .into_page();
        assert_eq!(page, Page { page: 3, limit: 20 });
    }

    #[test]
    fn list_query_builds_filter() {
        let query: ListQuery =
            serde_json::from_str(r#"{"status":"waiting","userId":4,"limit":5}"#).unwrap();
        let (filter, page) = query.into_parts();
        assert_eq!(filter.status, Some(ConsultationStatus::Waiting));
        assert_eq!(filter.user_id, Some(UserId::new(4)));
        assert!(filter.staff_id.is_none());
        assert_eq!(page, Page { page: 1, limit: 5 });
    }

    #[test]
    fn mark_read_body_is_optional() {
        let body: MarkReadBody = serde_json::from_str("{}").unwrap();
        assert!(body.message_ids.is_none());
        let body: MarkReadBody = serde_json::from_str(r#"{"messageIds":[1,2]}"#).unwrap();
        assert_eq!(body.message_ids.unwrap().len(), 2);
    }
}
