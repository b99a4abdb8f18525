//! Staff endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use concierge_auth::TokenVerifier;
use concierge_control::ConsultationControl;
use concierge_core::StaffStatus;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::GatewayState;

/// Request to change the caller's availability.
#[derive(Debug, Deserialize)]
pub struct UpdateStatusBody {
    /// New status.
    pub status: StaffStatus,
}

/// Connected users and staff.
///
/// # Errors
///
/// Returns an error if presence cannot be read.
pub async fn online_count<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    _user: AuthUser,
) -> Result<impl IntoResponse, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let status = state.control.online_status().await?;

    Ok(Json(status))
}

/// Staff who can take a consultation, `online` first, then by name.
///
/// Staff callers are left out of their own result, which makes the list usable
/// as transfer targets.
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn available<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let staff = state
        .control
        .available_staff(user.identity.as_staff())
        .await?;

    Ok(Json(staff))
}

/// Change the calling staff member's availability.
///
/// # Errors
///
/// Returns an error if the caller is not staff or the store fails.
pub async fn update_status<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Json(body): Json<UpdateStatusBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let staff_id = user.require_staff()?;
    let staff = state
        .control
        .update_staff_status(staff_id, body.status)
        .await?;

    Ok(Json(staff))
}
