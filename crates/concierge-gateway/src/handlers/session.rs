//! Session endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use concierge_auth::TokenVerifier;
use concierge_control::ConsultationControl;

use crate::auth::{bearer_token, AuthUser};
use crate::error::ApiError;
use crate::state::GatewayState;

/// Revoke the bearer token that authenticated this request.
///
/// The token is rejected by every later request and WebSocket handshake until it
/// would have expired anyway. Open connections are not closed.
///
/// # Errors
///
/// Returns an error if the token is invalid or the revocation list is unavailable.
pub async fn logout<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
    state.verifier.revoke(token).await?;

    tracing::info!(identity = %user.identity, "Token revoked on logout");
    Ok(StatusCode::NO_CONTENT)
}
