//! WebSocket connection handler.
//!
//! One WebSocket is one authenticated connection. Its lifecycle:
//!
//! ```text
//! connecting ──(token in header/query, or `authenticate` frame)──► authenticated
//!      │                                                              │
//!      └──(bad token / auth timeout)──► closed            ops, joins ─┤
//!                                                                     ▼
//!                                           closed ◄──(close, error, heartbeat timeout, drop)
//! ```
//!
//! Leaving the authenticated state by any path unregisters presence. Outbound
//! events flow through the connection's [`ConnectionHandle`] queue and a
//! dedicated writer task, which also sends the transport-level heartbeat pings.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use chrono::Utc;
use futures::stream::SplitSink;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

use concierge_auth::{AuthError, TokenVerifier, VerifiedIdentity};
use concierge_control::{
    CloseRequest, ConsultationControl, ConsultationId, Identity, MessageId, MessageType,
    SendMessageRequest, StaffId, TransferRequest,
};
use concierge_core::StaffStatus;
use concierge_router::{BroadcastTarget, ConnectionHandle, ServerEvent};

use crate::auth::{bearer_token, AuthUser};
use crate::error::ApiError;
use crate::state::GatewayState;

// =============================================================================
// Client Operations
// =============================================================================

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Bearer token, for clients that cannot set headers on the handshake.
    #[serde(default)]
    pub token: Option<String>,
}

/// Operations a client can send, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientOp {
    /// First frame of a connection that did not present a token on the handshake.
    Authenticate {
        /// Bearer token.
        token: String,
    },
    /// Application-level heartbeat.
    Ping,
    /// Ask for the number of connected users and staff.
    GetOnlineStatus,
    /// Subscribe to a consultation channel.
    JoinConsultation {
        /// The consultation.
        consultation_id: ConsultationId,
    },
    /// Unsubscribe from a consultation channel.
    LeaveConsultation {
        /// The consultation.
        consultation_id: ConsultationId,
    },
    /// Send a message.
    SendMessage {
        /// The consultation.
        consultation_id: ConsultationId,
        /// Payload kind.
        #[serde(default = "default_message_type")]
        message_type: MessageType,
        /// Text or media reference.
        content: String,
        /// Type-specific metadata.
        #[serde(default)]
        extra: Option<serde_json::Value>,
        /// Client correlation id, echoed in `messageSent`.
        #[serde(default)]
        client_ref: Option<String>,
    },
    /// The caller started typing.
    Typing {
        /// The consultation.
        consultation_id: ConsultationId,
    },
    /// The caller stopped typing.
    StopTyping {
        /// The consultation.
        consultation_id: ConsultationId,
    },
    /// Mark messages from the counterpart as read.
    MarkAsRead {
        /// The consultation.
        consultation_id: ConsultationId,
        /// Specific messages; every unread one when absent.
        #[serde(default)]
        message_ids: Option<Vec<MessageId>>,
    },
    /// Recall one of the caller's messages.
    RecallMessage {
        /// The message.
        message_id: MessageId,
    },
    /// Staff: accept a waiting consultation.
    AcceptConsultation {
        /// The consultation.
        consultation_id: ConsultationId,
    },
    /// Staff: hand a consultation to someone else.
    TransferConsultation {
        /// The consultation.
        consultation_id: ConsultationId,
        /// The new assignee.
        target_staff_id: StaffId,
        /// Why.
        reason: String,
    },
    /// Staff: close a consultation.
    CloseConsultation {
        /// The consultation.
        consultation_id: ConsultationId,
        /// Why.
        #[serde(default)]
        reason: Option<String>,
    },
    /// Staff: change availability.
    UpdateStatus {
        /// New status.
        status: StaffStatus,
    },
    /// Admin: announce a message.
    BroadcastMessage {
        /// Announcement text.
        message: String,
        /// Audience.
        #[serde(default = "default_target")]
        target: BroadcastTarget,
    },
    /// Admin: send a notification to one identity or a role.
    SystemNotification {
        /// Arbitrary payload.
        notification: serde_json::Value,
        /// Role of the recipient(s).
        target: BroadcastTarget,
        /// A single recipient within `target`.
        #[serde(default)]
        target_id: Option<u64>,
    },
}

const fn default_message_type() -> MessageType {
    MessageType::Text
}

const fn default_target() -> BroadcastTarget {
    BroadcastTarget::All
}

impl ClientOp {
    /// The wire name of this operation.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::Ping => "ping",
            Self::GetOnlineStatus => "getOnlineStatus",
            Self::JoinConsultation { .. } => "joinConsultation",
            Self::LeaveConsultation { .. } => "leaveConsultation",
            Self::SendMessage { .. } => "sendMessage",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stopTyping",
            Self::MarkAsRead { .. } => "markAsRead",
            Self::RecallMessage { .. } => "recallMessage",
            Self::AcceptConsultation { .. } => "acceptConsultation",
            Self::TransferConsultation { .. } => "transferConsultation",
            Self::CloseConsultation { .. } => "closeConsultation",
            Self::UpdateStatus { .. } => "updateStatus",
            Self::BroadcastMessage { .. } => "broadcastMessage",
            Self::SystemNotification { .. } => "systemNotification",
        }
    }
}

// =============================================================================
// Upgrade
// =============================================================================

/// WebSocket connection handler.
///
/// A token presented on the handshake (`Authorization: Bearer` or `?token=`) is
/// verified before upgrading, so a bad credential is refused with `401` and never
/// reaches presence. Without one, the client must send an `authenticate` frame
/// within the configured timeout.
///
/// # Errors
///
/// Returns `ApiError::Unauthorized` if a handshake token is invalid or revoked.
pub async fn websocket_handler<C, V>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState<C, V>>>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let token = bearer_token(&headers).map(str::to_string).or(params.token);

    let verified = match token {
        Some(token) => Some(
            authenticate_within(state.verifier.as_ref(), &token, state.config.auth_timeout())
                .await?,
        ),
        None => None,
    };

    Ok(ws.on_upgrade(move |socket| run_session(socket, state, verified)))
}

/// Verify a credential, giving up after `limit`.
async fn authenticate_within<V: TokenVerifier>(
    verifier: &V,
    token: &str,
    limit: Duration,
) -> Result<VerifiedIdentity, AuthError> {
    tokio::time::timeout(limit, verifier.authenticate(token))
        .await
        .unwrap_or(Err(AuthError::Timeout))
}

// =============================================================================
// Session
// =============================================================================

async fn run_session<C, V>(
    socket: WebSocket,
    state: Arc<GatewayState<C, V>>,
    verified: Option<VerifiedIdentity>,
) where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
{
    let (mut sink, mut stream) = socket.split();

    let verified = match verified {
        Some(verified) => verified,
        None => match await_authentication(&mut sink, &mut stream, &state).await {
            Some(verified) => verified,
            None => {
                let _ = sink.close().await;
                return;
            }
        },
    };

    let identity = verified.identity;
    let (handle, outbound) = ConnectionHandle::new(identity);
    let connection_id = handle.id();

    let registration = match state.control.connect(handle.clone(), verified.username).await {
        Ok(registration) => registration,
        Err(e) => {
            tracing::error!(identity = %identity, error = %e, "Failed to register connection");
            let event = ApiError::from(e).to_event(Some("authenticate"));
            let _ = send_event(&mut sink, &event).await;
            let _ = sink.close().await;
            return;
        }
    };
    let guard = SessionGuard::new(Arc::clone(&state.control), handle.clone());

    tracing::info!(
        identity = %identity,
        connection_id = %connection_id,
        superseded = ?registration.superseded,
        "WebSocket connection authenticated"
    );

    handle.send(ServerEvent::Authenticated { identity });

    let mut writer = tokio::spawn(write_loop(
        sink,
        outbound,
        state.config.heartbeat_interval(),
    ));

    tokio::select! {
        () = read_loop(&mut stream, &state, &handle) => {}
        _ = &mut writer => {
            tracing::debug!(connection_id = %connection_id, "WebSocket writer ended");
        }
    }

    guard.finish().await;
    writer.abort();

    tracing::info!(identity = %identity, connection_id = %connection_id, "WebSocket connection closed");
}

/// Wait for an `authenticate` frame; reports the failure to the client on error.
async fn await_authentication<C, V, Si, St>(
    sink: &mut Si,
    stream: &mut St,
    state: &GatewayState<C, V>,
) -> Option<VerifiedIdentity>
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
    Si: Sink<Message> + Unpin,
    St: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let limit = state.config.auth_timeout();
    let attempt = async {
        loop {
            let text = match stream.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                _ => {
                    return Err(ApiError::Unauthorized(
                        "connection closed before authenticating".to_string(),
                    ))
                }
            };
            return match serde_json::from_str::<ClientOp>(&text) {
                Ok(ClientOp::Authenticate { token }) => state
                    .verifier
                    .authenticate(&token)
                    .await
                    .map_err(ApiError::from),
                Ok(other) => Err(ApiError::Unauthorized(format!(
                    "authenticate before {}",
                    other.name()
                ))),
                Err(e) => Err(ApiError::BadRequest(format!("invalid frame: {e}"))),
            };
        }
    };

    let outcome = tokio::time::timeout(limit, attempt)
        .await
        .unwrap_or_else(|_| Err(ApiError::from(AuthError::Timeout)));

    match outcome {
        Ok(verified) => Some(verified),
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket authentication failed");
            let _ = send_event(sink, &e.to_event(Some("authenticate"))).await;
            None
        }
    }
}

/// Read frames until the client goes away or falls silent.
async fn read_loop<C, V, St>(stream: &mut St, state: &GatewayState<C, V>, handle: &ConnectionHandle)
where
    C: ConsultationControl + 'static,
    V: TokenVerifier + 'static,
    St: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let silence = state.config.heartbeat_timeout();
    loop {
        let frame = match tokio::time::timeout(silence, stream.next()).await {
            Err(_) => {
                tracing::info!(connection_id = %handle.id(), "Heartbeat timeout");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(connection_id = %handle.id(), error = %e, "WebSocket read failed");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                if let Some(reply) = handle_frame(state.control.as_ref(), handle.identity(), &text).await {
                    handle.send(reply);
                }
            }
            Message::Binary(_) => {
                handle.send(ServerEvent::error(
                    "VALIDATION_ERROR",
                    "binary frames are not supported",
                    None,
                ));
            }
            Message::Close(_) => break,
            // Pongs only prove liveness; axum answers pings itself.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

/// Forward queued events to the socket and keep the heartbeat going.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: UnboundedReceiver<ServerEvent>,
    heartbeat: Duration,
) {
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else { break };
                if send_event(&mut sink, &event).await.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
}

async fn send_event<Si>(sink: &mut Si, event: &ServerEvent) -> Result<(), Si::Error>
where
    Si: Sink<Message> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(text) => sink.send(Message::Text(text)).await,
        Err(e) => {
            tracing::warn!(event = event.name(), error = %e, "Failed to serialize event");
            Ok(())
        }
    }
}

/// Unregisters the connection exactly once, even if the session task is dropped
/// or panics before reaching [`SessionGuard::finish`].
struct SessionGuard<C: ConsultationControl + 'static> {
    control: Arc<C>,
    handle: Option<ConnectionHandle>,
}

impl<C: ConsultationControl + 'static> SessionGuard<C> {
    fn new(control: Arc<C>, handle: ConnectionHandle) -> Self {
        Self {
            control,
            handle: Some(handle),
        }
    }

    async fn finish(mut self) {
        if let Some(handle) = self.handle.take() {
            self.control.disconnect(&handle).await;
        }
    }
}

impl<C: ConsultationControl + 'static> Drop for SessionGuard<C> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let control = Arc::clone(&self.control);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    control.disconnect(&handle).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    connection_id = %handle.id(),
                    "No runtime left to unregister connection"
                );
            }
        }
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Parse and run one text frame; returns the reply for the sender, if any.
pub(crate) async fn handle_frame<C: ConsultationControl>(
    control: &C,
    identity: Identity,
    text: &str,
) -> Option<ServerEvent> {
    let op = match serde_json::from_str::<ClientOp>(text) {
        Ok(op) => op,
        Err(e) => {
            return Some(ApiError::BadRequest(format!("invalid frame: {e}")).to_event(None));
        }
    };
    let name = op.name();
    match dispatch(control, identity, op).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::debug!(identity = %identity, op = name, error = %e, "Operation failed");
            Some(e.to_event(Some(name)))
        }
    }
}

fn ack<T: Serialize>(op: &str, data: &T) -> ServerEvent {
    ServerEvent::ack(op, serde_json::to_value(data).unwrap_or_default())
}

/// Run one operation on behalf of `identity`, enforcing role restrictions.
pub(crate) async fn dispatch<C: ConsultationControl>(
    control: &C,
    identity: Identity,
    op: ClientOp,
) -> Result<Option<ServerEvent>, ApiError> {
    let caller = AuthUser { identity };
    let name = op.name();

    let reply = match op {
        ClientOp::Authenticate { .. } => {
            return Err(ApiError::BadRequest(
                "connection is already authenticated".to_string(),
            ))
        }
        ClientOp::Ping => ServerEvent::Pong {
            timestamp: Utc::now(),
        },
        ClientOp::GetOnlineStatus => {
            let status = control.online_status().await?;
            ServerEvent::OnlineStatus {
                users: status.users,
                staff: status.staff,
                timestamp: Utc::now(),
            }
        }
        ClientOp::JoinConsultation { consultation_id } => {
            let consultation = control.join_consultation(identity, consultation_id).await?;
            ServerEvent::Joined { consultation }
        }
        ClientOp::LeaveConsultation { consultation_id } => {
            control.leave_consultation(identity, consultation_id).await?;
            ServerEvent::ack(name, serde_json::Value::Null)
        }
        ClientOp::SendMessage {
            consultation_id,
            message_type,
            content,
            extra,
            client_ref,
        } => {
            let request = SendMessageRequest {
                consultation_id,
                message_type,
                content,
                extra,
            };
            let message = control.send_message(identity, request).await?;
            ServerEvent::MessageSent {
                message,
                client_ref,
            }
        }
        ClientOp::Typing { consultation_id } => {
            control.set_typing(identity, consultation_id, true).await?;
            return Ok(None);
        }
        ClientOp::StopTyping { consultation_id } => {
            control.set_typing(identity, consultation_id, false).await?;
            return Ok(None);
        }
        ClientOp::MarkAsRead {
            consultation_id,
            message_ids,
        } => {
            let changed = control
                .mark_read(identity, consultation_id, message_ids)
                .await?;
            ack(name, &serde_json::json!({ "messageIds": changed }))
        }
        ClientOp::RecallMessage { message_id } => {
            let message = control.recall_message(identity, message_id).await?;
            ack(name, &message)
        }
        ClientOp::AcceptConsultation { consultation_id } => {
            let staff_id = caller.require_staff()?;
            let consultation = control.accept_consultation(staff_id, consultation_id).await?;
            ack(name, &consultation)
        }
        ClientOp::TransferConsultation {
            consultation_id,
            target_staff_id,
            reason,
        } => {
            caller.require_staff()?;
            let request = TransferRequest {
                target_staff_id,
                reason,
            };
            let consultation = control
                .transfer_consultation(identity, consultation_id, request)
                .await?;
            ack(name, &consultation)
        }
        ClientOp::CloseConsultation {
            consultation_id,
            reason,
        } => {
            caller.require_staff()?;
            let request = CloseRequest {
                reason,
                ..CloseRequest::default()
            };
            let consultation = control
                .close_consultation(identity, consultation_id, request)
                .await?;
            ack(name, &consultation)
        }
        ClientOp::UpdateStatus { status } => {
            let staff_id = caller.require_staff()?;
            let staff = control.update_staff_status(staff_id, status).await?;
            ack(name, &staff)
        }
        ClientOp::BroadcastMessage { message, target } => {
            let admin_id = caller.require_admin()?;
            let report = control.broadcast(admin_id, message, target).await?;
            ack(
                name,
                &serde_json::json!({ "delivered": report.delivered, "dropped": report.dropped }),
            )
        }
        ClientOp::SystemNotification {
            notification,
            target,
            target_id,
        } => {
            let admin_id = caller.require_admin()?;
            let report = control
                .notify(admin_id, notification, target, target_id)
                .await?;
            ack(
                name,
                &serde_json::json!({ "delivered": report.delivered, "dropped": report.dropped }),
            )
        }
    };

    Ok(Some(reply))
}
