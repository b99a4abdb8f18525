//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use concierge_auth::TokenVerifier;
use concierge_control::ConsultationControl;

use crate::handlers::{admin, consultations, health, messages, session, staff, ws};
use crate::state::GatewayState;

/// Create the gateway router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Readiness of the consultation service
///
/// ## Session (authenticated)
/// - `POST /v1/auth/logout` - Revoke the presented token
///
/// ## Consultations (authenticated)
/// - `GET /v1/consultations` - List visible consultations (`?status=waiting` for the queue)
/// - `POST /v1/consultations` - Open a consultation (user)
/// - `GET /v1/consultations/:id` - Get consultation
/// - `POST /v1/consultations/:id/accept` - Accept (staff)
/// - `POST /v1/consultations/:id/transfer` - Transfer (staff)
/// - `POST /v1/consultations/:id/close` - Close
/// - `POST /v1/consultations/:id/rate` - Rate (user)
/// - `GET /v1/consultations/:id/messages` - Message history
/// - `POST /v1/consultations/:id/read` - Mark messages as read
/// - `GET /v1/consultations/:id/unread` - Unread counter
///
/// ## Messages (authenticated)
/// - `POST /v1/messages` - Send message
/// - `POST /v1/messages/:id/recall` - Recall message
/// - `DELETE /v1/messages/:id` - Delete message
///
/// ## Staff & administration (authenticated)
/// - `GET /v1/staff/online-count` - Connected users and staff
/// - `GET /v1/staff/available` - Staff who can take a consultation
/// - `PUT /v1/staff/status` - Change availability (staff)
/// - `POST /v1/admin/broadcast` - Announcement (admin)
/// - `POST /v1/admin/notify` - Notification (admin)
///
/// ## Realtime
/// - `GET /v1/ws` - WebSocket connection
pub fn create_router<C, V>(state: GatewayState<C, V>) -> Router
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout = state.config.request_timeout();

    let cors = build_cors_layer(&cors_origins);
    let state = Arc::new(state);

    // The WebSocket route stays outside the request timeout; sessions are long-lived.
    let realtime = Router::new().route("/v1/ws", get(ws::websocket_handler::<C, V>));

    let api = Router::new()
        .route("/health", get(health::health::<C, V>))
        // Session
        .route("/v1/auth/logout", post(session::logout::<C, V>))
        // Consultations
        .route(
            "/v1/consultations",
            get(consultations::list_consultations::<C, V>)
                .post(consultations::create_consultation::<C, V>),
        )
        .route(
            "/v1/consultations/:consultation_id",
            get(consultations::get_consultation::<C, V>),
        )
        .route(
            "/v1/consultations/:consultation_id/accept",
            post(consultations::accept_consultation::<C, V>),
        )
        .route(
            "/v1/consultations/:consultation_id/transfer",
            post(consultations::transfer_consultation::<C, V>),
        )
        .route(
            "/v1/consultations/:consultation_id/close",
            post(consultations::close_consultation::<C, V>),
        )
        .route(
            "/v1/consultations/:consultation_id/rate",
            post(consultations::rate_consultation::<C, V>),
        )
        .route(
            "/v1/consultations/:consultation_id/messages",
            get(consultations::list_messages::<C, V>),
        )
        .route(
            "/v1/consultations/:consultation_id/read",
            post(consultations::mark_read::<C, V>),
        )
        .route(
            "/v1/consultations/:consultation_id/unread",
            get(consultations::unread_count::<C, V>),
        )
        // Messages
        .route("/v1/messages", post(messages::send_message::<C, V>))
        .route(
            "/v1/messages/:message_id/recall",
            post(messages::recall_message::<C, V>),
        )
        .route(
            "/v1/messages/:message_id",
            delete(messages::delete_message::<C, V>),
        )
        // Staff & administration
        .route("/v1/staff/online-count", get(staff::online_count::<C, V>))
        .route("/v1/staff/available", get(staff::available::<C, V>))
        .route("/v1/staff/status", put(staff::update_status::<C, V>))
        .route("/v1/admin/broadcast", post(admin::broadcast::<C, V>))
        .route("/v1/admin/notify", post(admin::notify::<C, V>))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(request_timeout));

    api.merge(realtime)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        // For specific origins, parse them
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
            .max_age(Duration::from_secs(3600))
    }
}
