//! Message endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use concierge_auth::TokenVerifier;
use concierge_control::{ConsultationControl, MessageId, SendMessageRequest};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::handlers::parse_id;
use crate::state::GatewayState;

/// Send a message into a consultation.
///
/// The response carries the store-assigned message; participants connected over
/// WebSocket receive it as `newMessage`.
///
/// # Errors
///
/// Returns an error if the payload is invalid, the caller is not a participant,
/// or the store rejects the write.
pub async fn send_message<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let message = state.control.send_message(user.identity, body).await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Recall one of the caller's messages.
///
/// # Errors
///
/// Returns an error if the caller did not send the message or the recall window
/// has passed.
pub async fn recall_message<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(message_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let message_id: MessageId = parse_id("message", &message_id)?;
    let message = state.control.recall_message(user.identity, message_id).await?;

    Ok(Json(message))
}

/// Soft-delete one of the caller's messages.
///
/// # Errors
///
/// Returns an error if the caller did not send the message.
pub async fn delete_message<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(message_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let message_id: MessageId = parse_id("message", &message_id)?;
    state.control.delete_message(user.identity, message_id).await?;

    Ok(StatusCode::NO_CONTENT)
}
