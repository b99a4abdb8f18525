//! Consultation service implementation.
//!
//! This module provides the [`ConsultationControl`] trait and the
//! [`ConsultationService`] implementation that coordinates the consultation
//! lifecycle, message flow and presence bookkeeping.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use concierge_core::{
    AdminId, ConsultationId, Identity, MessageId, Role, StaffId, StaffStatus, UserId,
};
use concierge_router::{
    AssignmentPolicy, Audience, BroadcastTarget, Candidate, ConnectionHandle, CursorStore,
    DeliveryReport, FanoutRouter, MemoryCursorStore, MemoryPresenceStore, Participants,
    PresenceRegistry, PresenceStore, Registration, ServerEvent,
};
use concierge_store::{
    Consultation, ConsultationFilter, ConsultationPage, ConsultationStatus, Message, MessagePage,
    MessageStatus, NewConsultation, NewMessage, Page, Staff, StaffFilter, Store, StoreError,
    TransferRecord,
};

use crate::actor::ActorRegistry;
use crate::error::{ControlError, Result};
use crate::lifecycle;
use crate::types::{
    CloseRequest, ControlConfig, CreateConsultationRequest, OnlineStatus, RateRequest,
    SendMessageRequest, TransferRequest,
};
use crate::validation;

/// Trait defining the consultation operations.
///
/// Every method takes the verified identity of the caller; authorization against
/// the consultation's participants happens here, not in the transport.
#[async_trait]
pub trait ConsultationControl: Send + Sync {
    // =========================================================================
    // Connections
    // =========================================================================

    /// Register a freshly authenticated connection.
    ///
    /// Staff connecting while stored as `offline` are marked `online`; a staff
    /// member without a record gets one named `display_name`.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ServiceUnavailable` if presence could not be recorded.
    async fn connect(
        &self,
        handle: ConnectionHandle,
        display_name: Option<String>,
    ) -> Result<Registration>;

    /// Tear down a connection. Best-effort; never fails.
    async fn disconnect(&self, handle: &ConnectionHandle);

    /// Connected users and staff.
    async fn online_status(&self) -> Result<OnlineStatus>;

    // =========================================================================
    // Consultation Lifecycle
    // =========================================================================

    /// Open a consultation for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Conflict` carrying the existing consultation if the
    /// user already has one open, and `ControlError::InvalidTarget` if the requested
    /// staff member is unknown or offline.
    async fn create_consultation(
        &self,
        user_id: UserId,
        request: CreateConsultationRequest,
    ) -> Result<Consultation>;

    /// Get a consultation the caller may see.
    async fn get_consultation(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
    ) -> Result<Consultation>;

    /// List consultations the caller may see, newest first.
    ///
    /// Users only see their own. Staff see their own assignments, or every
    /// consultation when asking for `waiting` ones. Admins see everything.
    async fn list_consultations(
        &self,
        actor: Identity,
        filter: ConsultationFilter,
        page: Page,
    ) -> Result<ConsultationPage>;

    /// Accept a waiting consultation.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidState` if it is no longer waiting, which is
    /// what the loser of a concurrent accept sees.
    async fn accept_consultation(
        &self,
        staff_id: StaffId,
        consultation_id: ConsultationId,
    ) -> Result<Consultation>;

    /// Hand an active consultation to another staff member.
    async fn transfer_consultation(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
        request: TransferRequest,
    ) -> Result<Consultation>;

    /// Close a waiting or active consultation.
    async fn close_consultation(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
        request: CloseRequest,
    ) -> Result<Consultation>;

    /// Rate a closed consultation. Only the first rating is kept.
    async fn rate_consultation(
        &self,
        user_id: UserId,
        consultation_id: ConsultationId,
        request: RateRequest,
    ) -> Result<Consultation>;

    // =========================================================================
    // Channel Membership
    // =========================================================================

    /// Subscribe the caller to a consultation channel.
    async fn join_consultation(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
    ) -> Result<Consultation>;

    /// Unsubscribe the caller from a consultation channel.
    async fn leave_consultation(&self, actor: Identity, consultation_id: ConsultationId)
        -> Result<()>;

    // =========================================================================
    // Messages
    // =========================================================================

    /// Commit a message, then fan it out.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ServiceUnavailable` if the store rejects the write; in
    /// that case nothing is published.
    async fn send_message(&self, actor: Identity, request: SendMessageRequest) -> Result<Message>;

    /// Recall one of the caller's messages within the recall window.
    async fn recall_message(&self, actor: Identity, message_id: MessageId) -> Result<Message>;

    /// Soft-delete one of the caller's messages.
    async fn delete_message(&self, actor: Identity, message_id: MessageId) -> Result<Message>;

    /// Tell the counterpart the caller started or stopped typing.
    async fn set_typing(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
        typing: bool,
    ) -> Result<()>;

    /// Mark messages from the counterpart as read; returns the ids that changed.
    async fn mark_read(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
        message_ids: Option<Vec<MessageId>>,
    ) -> Result<Vec<MessageId>>;

    /// Read a page of history.
    async fn message_history(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
        page: Page,
    ) -> Result<MessagePage>;

    /// Messages from the counterpart the caller has not read yet.
    async fn unread_count(&self, actor: Identity, consultation_id: ConsultationId) -> Result<u32>;

    // =========================================================================
    // Staff & Administration
    // =========================================================================

    /// Staff that can take a consultation: `online` first, then `busy`, each by name.
    async fn available_staff(&self, exclude: Option<StaffId>) -> Result<Vec<Staff>>;

    /// Change a staff member's availability.
    async fn update_staff_status(&self, staff_id: StaffId, status: StaffStatus) -> Result<Staff>;

    /// Announce a message to connected users, staff or everyone.
    async fn broadcast(
        &self,
        admin_id: AdminId,
        message: String,
        target: BroadcastTarget,
    ) -> Result<DeliveryReport>;

    /// Send a notification to one identity, or to a whole role when `target_id` is absent.
    async fn notify(
        &self,
        admin_id: AdminId,
        notification: serde_json::Value,
        target: BroadcastTarget,
        target_id: Option<u64>,
    ) -> Result<DeliveryReport>;
}

/// The main consultation service implementation.
pub struct ConsultationService<
    S: Store,
    P: PresenceStore = MemoryPresenceStore,
    C: CursorStore = MemoryCursorStore,
> {
    inner: Arc<Inner<S, P, C>>,
    actors: ActorRegistry,
}

struct Inner<S: Store, P: PresenceStore, C: CursorStore> {
    store: Arc<S>,
    router: FanoutRouter<P>,
    policy: AssignmentPolicy<C>,
    config: ControlConfig,
}

impl<S: Store> ConsultationService<S> {
    /// Create a single-process service with in-memory presence and cursor.
    #[must_use]
    pub fn in_memory(store: Arc<S>, config: ControlConfig) -> Self {
        Self::new(
            store,
            Arc::new(PresenceRegistry::in_memory()),
            Arc::new(MemoryCursorStore::new()),
            config,
        )
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::in_memory(store, ControlConfig::default())
    }
}

impl<S: Store, P: PresenceStore, C: CursorStore> ConsultationService<S, P, C> {
    /// Create a new consultation service.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        presence: Arc<PresenceRegistry<P>>,
        cursor: Arc<C>,
        config: ControlConfig,
    ) -> Self {
        let policy =
            AssignmentPolicy::new(config.strategy, config.max_concurrent_consultations, cursor);
        let actors = ActorRegistry::new(config.actor_idle_timeout(), config.actor_mailbox);
        Self {
            inner: Arc::new(Inner {
                store,
                router: FanoutRouter::new(presence),
                policy,
                config,
            }),
            actors,
        }
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    /// The presence registry connections are bound in.
    #[must_use]
    pub fn presence(&self) -> &Arc<PresenceRegistry<P>> {
        self.inner.router.presence()
    }

    /// The fan-out router.
    #[must_use]
    pub fn router(&self) -> &FanoutRouter<P> {
        &self.inner.router
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &ControlConfig {
        &self.inner.config
    }

    /// The per-consultation actors.
    #[must_use]
    pub const fn actors(&self) -> &ActorRegistry {
        &self.actors
    }

    /// Run `job` on the consultation's actor.
    async fn on_actor<T, F, Fut>(&self, consultation_id: ConsultationId, job: F) -> Result<T>
    where
        F: FnOnce(Arc<Inner<S, P, C>>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.actors
            .run(consultation_id, job(Arc::clone(&self.inner)))
            .await?
    }
}

// =============================================================================
// Authorization
// =============================================================================

/// Owner user or current assignee.
fn authorize_participant(consultation: &Consultation, actor: Identity) -> Result<()> {
    if Participants::from(consultation).includes(actor) {
        Ok(())
    } else {
        Err(ControlError::Forbidden(format!(
            "{actor} is not a participant of consultation {}",
            consultation.id
        )))
    }
}

/// Participants and administrators.
fn authorize_manage(consultation: &Consultation, actor: Identity) -> Result<()> {
    if actor.is_admin() {
        return Ok(());
    }
    authorize_participant(consultation, actor)
}

/// Participants, administrators, and any staff member while it is still waiting.
fn authorize_view(consultation: &Consultation, actor: Identity) -> Result<()> {
    if consultation.status == ConsultationStatus::Waiting && actor.role() == Role::Staff {
        return Ok(());
    }
    authorize_manage(consultation, actor)
}

/// Narrow `filter` to what `actor` may list.
fn scope_listing(mut filter: ConsultationFilter, actor: Identity) -> ConsultationFilter {
    match actor {
        Identity::User(user_id) => filter.user_id = Some(user_id),
        Identity::Staff(staff_id) => {
            if filter.status != Some(ConsultationStatus::Waiting) {
                filter.staff_id = Some(staff_id);
            }
        }
        Identity::Admin(_) => {}
    }
    filter
}

const fn roles_for(target: BroadcastTarget) -> &'static [Role] {
    match target {
        BroadcastTarget::All => &[Role::User, Role::Staff, Role::Admin],
        BroadcastTarget::Users => &[Role::User],
        BroadcastTarget::Staff => &[Role::Staff],
    }
}

// =============================================================================
// Actor-side operations
// =============================================================================

impl<S: Store, P: PresenceStore, C: CursorStore> Inner<S, P, C> {
    async fn load(&self, consultation_id: ConsultationId) -> Result<Consultation> {
        self.store
            .get_consultation(consultation_id)
            .await?
            .ok_or(ControlError::NotFound(consultation_id))
    }

    async fn load_message(&self, message_id: MessageId) -> Result<Message> {
        self.store
            .get_message(message_id)
            .await?
            .ok_or(ControlError::MessageNotFound(message_id))
    }

    async fn ensure_reachable(&self, staff_id: StaffId) -> Result<Staff> {
        let staff = self
            .store
            .get_staff(staff_id)
            .await?
            .ok_or(ControlError::InvalidTarget {
                staff_id,
                reason: "unknown staff member",
            })?;
        if !staff.status.is_reachable() {
            return Err(ControlError::InvalidTarget {
                staff_id,
                reason: "staff member is offline",
            });
        }
        Ok(staff)
    }

    async fn candidate_pool(&self) -> Result<Vec<Candidate>> {
        let staff = self
            .store
            .get_available_staff(&StaffFilter::assignable())
            .await?;
        let mut pool = Vec::with_capacity(staff.len());
        for member in staff {
            let active = self.store.count_active_consultations(member.id).await?;
            pool.push(Candidate {
                staff_id: member.id,
                status: member.status,
                active,
            });
        }
        Ok(pool)
    }

    async fn auto_assign(&self) -> Result<Option<StaffId>> {
        let pool = self.candidate_pool().await?;
        Ok(self.policy.choose(&pool).await?)
    }

    async fn staff_name(&self, staff_id: StaffId) -> String {
        match self.store.get_staff(staff_id).await {
            Ok(Some(staff)) => staff.name,
            _ => format!("#{staff_id}"),
        }
    }

    async fn system_message(&self, consultation_id: ConsultationId, content: String) {
        if let Err(e) = self
            .store
            .create_message(NewMessage::system(consultation_id, content))
            .await
        {
            tracing::warn!(
                consultation_id = %consultation_id,
                error = %e,
                "Failed to record system message"
            );
        }
    }

    async fn broadcast_roles(
        &self,
        roles: &[Role],
        event: &ServerEvent,
        except: Option<Identity>,
    ) -> Result<DeliveryReport> {
        let mut total = DeliveryReport::default();
        for role in roles {
            let report = self
                .router
                .presence()
                .broadcast_role(*role, event, except)
                .await?;
            total.delivered += report.delivered;
            total.dropped += report.dropped;
        }
        Ok(total)
    }

    async fn announce_created(&self, consultation: &Consultation) {
        match consultation.staff_id {
            Some(staff_id) => {
                let name = self.staff_name(staff_id).await;
                self.system_message(consultation.id, format!("Staff {name} is now serving you"))
                    .await;
                let event = ServerEvent::NewConsultation {
                    consultation: consultation.clone(),
                };
                self.router.deliver(Identity::Staff(staff_id), event).await;
            }
            None => {
                self.system_message(
                    consultation.id,
                    "Assigning a staff member, please wait".to_string(),
                )
                .await;
                let event = ServerEvent::ConsultationWaiting {
                    consultation: consultation.clone(),
                };
                if let Err(e) = self.broadcast_roles(&[Role::Staff], &event, None).await {
                    tracing::warn!(
                        consultation_id = %consultation.id,
                        error = %e,
                        "Failed to announce waiting consultation"
                    );
                }
            }
        }
    }

    async fn accept(&self, staff_id: StaffId, consultation_id: ConsultationId) -> Result<Consultation> {
        let mut consultation = self.load(consultation_id).await?;
        lifecycle::ensure_acceptable(&consultation)?;
        consultation.status = lifecycle::validate_transition(
            consultation_id,
            consultation.status,
            ConsultationStatus::Active,
        )?;

        let now = Utc::now();
        consultation.staff_id = Some(staff_id);
        consultation.accepted_at = Some(now);
        consultation.updated_at = now;
        self.store.update_consultation(&consultation).await?;

        tracing::info!(
            consultation_id = %consultation_id,
            staff_id = %staff_id,
            "Consultation accepted"
        );

        let name = self.staff_name(staff_id).await;
        self.system_message(consultation_id, format!("Staff {name} is now serving you"))
            .await;

        let staff = Identity::Staff(staff_id);
        self.router
            .publish(
                &Participants::from(&consultation),
                Some(staff),
                Audience::Room,
                ServerEvent::StaffJoined {
                    consultation: consultation.clone(),
                    staff_id,
                },
            )
            .await;
        Ok(consultation)
    }

    async fn transfer(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
        request: TransferRequest,
    ) -> Result<Consultation> {
        let mut consultation = self.load(consultation_id).await?;
        authorize_manage(&consultation, actor)?;
        lifecycle::ensure_transferable(&consultation)?;

        let target = request.target_staff_id;
        if consultation.staff_id == Some(target) {
            return Err(ControlError::InvalidTarget {
                staff_id: target,
                reason: "already assigned to this consultation",
            });
        }
        let target_staff = self.ensure_reachable(target).await?;
        lifecycle::validate_transition(
            consultation_id,
            consultation.status,
            ConsultationStatus::Active,
        )?;

        let before = Participants::from(&consultation);
        let from_staff_id = consultation.staff_id;
        let now = Utc::now();
        consultation.transfer_history.push(TransferRecord {
            from_staff_id,
            to_staff_id: target,
            reason: request.reason.clone(),
            transferred_at: now,
        });
        consultation.staff_id = Some(target);
        consultation.updated_at = now;
        self.store.update_consultation(&consultation).await?;

        tracing::info!(
            consultation_id = %consultation_id,
            from_staff_id = ?from_staff_id,
            to_staff_id = %target,
            reason = %request.reason,
            "Consultation transferred"
        );

        self.system_message(
            consultation_id,
            format!("Consultation transferred to staff {}", target_staff.name),
        )
        .await;

        // The previous assignee and the user learn about the hand-off; the new
        // assignee receives the full consultation.
        self.router
            .publish(
                &before,
                Some(actor),
                Audience::Room,
                ServerEvent::ConsultationTransferring {
                    consultation_id,
                    from_staff_id,
                    to_staff_id: target,
                    reason: request.reason.clone(),
                },
            )
            .await;
        self.router
            .deliver(
                Identity::Staff(target),
                ServerEvent::ConsultationTransferred {
                    consultation: consultation.clone(),
                    from_staff_id,
                    reason: request.reason,
                },
            )
            .await;
        Ok(consultation)
    }

    async fn close(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
        request: CloseRequest,
    ) -> Result<Consultation> {
        let mut consultation = self.load(consultation_id).await?;
        authorize_manage(&consultation, actor)?;
        if request.rating.is_some() && actor != Identity::User(consultation.user_id) {
            return Err(ControlError::Forbidden(
                "only the consultation owner can rate it".to_string(),
            ));
        }
        consultation.status = lifecycle::validate_transition(
            consultation_id,
            consultation.status,
            ConsultationStatus::Closed,
        )?;

        let now = Utc::now();
        let closed_by = actor.role();
        consultation.closed_at = Some(now);
        consultation.close_reason.clone_from(&request.reason);
        consultation.closed_by = Some(closed_by);
        consultation.rating = request.rating;
        consultation.feedback = request.feedback;
        consultation.updated_at = now;
        self.store.update_consultation(&consultation).await?;

        tracing::info!(
            consultation_id = %consultation_id,
            closed_by = %closed_by,
            reason = ?request.reason,
            "Consultation closed"
        );

        self.system_message(consultation_id, "Consultation closed".to_string())
            .await;
        self.router
            .publish(
                &Participants::from(&consultation),
                Some(actor),
                Audience::Room,
                ServerEvent::ConsultationClosed {
                    consultation: consultation.clone(),
                    closed_by,
                    reason: request.reason,
                },
            )
            .await;
        self.router.close_channel(consultation_id);
        Ok(consultation)
    }

    async fn rate(
        &self,
        user_id: UserId,
        consultation_id: ConsultationId,
        request: RateRequest,
    ) -> Result<Consultation> {
        let mut consultation = self.load(consultation_id).await?;
        if consultation.user_id != user_id {
            return Err(ControlError::Forbidden(
                "only the consultation owner can rate it".to_string(),
            ));
        }
        lifecycle::ensure_rateable(&consultation)?;

        consultation.rating = Some(request.rating);
        consultation.feedback = request.feedback;
        consultation.updated_at = Utc::now();
        self.store.update_consultation(&consultation).await?;

        tracing::info!(
            consultation_id = %consultation_id,
            rating = request.rating,
            "Consultation rated"
        );
        Ok(consultation)
    }

    async fn join(&self, actor: Identity, consultation_id: ConsultationId) -> Result<Consultation> {
        let consultation = self.load(consultation_id).await?;
        authorize_manage(&consultation, actor)?;

        if self.router.join(consultation_id, actor) {
            self.router
                .publish(
                    &Participants::from(&consultation),
                    Some(actor),
                    Audience::Room,
                    ServerEvent::UserJoined {
                        consultation_id,
                        identity: actor,
                    },
                )
                .await;
        }
        Ok(consultation)
    }

    async fn announce_left(&self, actor: Identity, consultation_id: ConsultationId) -> Result<()> {
        let consultation = self.load(consultation_id).await?;
        self.router
            .publish(
                &Participants::from(&consultation),
                Some(actor),
                Audience::Room,
                ServerEvent::UserLeft {
                    consultation_id,
                    identity: actor,
                },
            )
            .await;
        Ok(())
    }

    async fn leave(&self, actor: Identity, consultation_id: ConsultationId) -> Result<()> {
        if self.router.leave(consultation_id, actor) {
            self.announce_left(actor, consultation_id).await?;
        }
        Ok(())
    }

    async fn send(&self, actor: Identity, request: SendMessageRequest) -> Result<Message> {
        let consultation = self.load(request.consultation_id).await?;
        authorize_participant(&consultation, actor)?;
        if lifecycle::is_terminal(consultation.status) {
            return Err(ControlError::InvalidState(format!(
                "consultation {} is closed",
                consultation.id
            )));
        }

        let new = NewMessage {
            consultation_id: consultation.id,
            sender: Some(actor),
            message_type: request.message_type,
            content: request.content,
            extra: request.extra,
            created_at: Utc::now(),
        };
        let message = match self.store.create_message(new).await {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(
                    consultation_id = %consultation.id,
                    sender = %actor,
                    error = %e,
                    "Message commit failed, nothing published"
                );
                return Err(ControlError::ServiceUnavailable(format!(
                    "message could not be stored: {e}"
                )));
            }
        };

        self.router
            .publish(
                &Participants::from(&consultation),
                Some(actor),
                Audience::Room,
                ServerEvent::NewMessage {
                    message: message.clone(),
                },
            )
            .await;
        Ok(message)
    }

    async fn recall(&self, actor: Identity, message_id: MessageId) -> Result<Message> {
        let message = self.load_message(message_id).await?;
        if message.sender != Some(actor) {
            return Err(ControlError::Forbidden(
                "only the sender can recall a message".to_string(),
            ));
        }
        if message.status != MessageStatus::Sent {
            return Err(ControlError::InvalidState(format!(
                "message {message_id} can no longer be recalled"
            )));
        }
        let window = self.config.recall_window_seconds;
        if !validation::recall_window_open(message.created_at, Utc::now(), window) {
            return Err(ControlError::InvalidState(format!(
                "message {message_id} is older than the {window}s recall window"
            )));
        }

        let message = self
            .store
            .update_message_status(message_id, MessageStatus::Recalled)
            .await?;
        let consultation = self.load(message.consultation_id).await?;
        self.router
            .publish(
                &Participants::from(&consultation),
                Some(actor),
                Audience::Room,
                ServerEvent::MessageRecalled {
                    consultation_id: consultation.id,
                    message_id,
                    recalled_by: actor,
                },
            )
            .await;
        Ok(message)
    }

    async fn delete(&self, actor: Identity, message_id: MessageId) -> Result<Message> {
        let message = self.load_message(message_id).await?;
        if message.sender != Some(actor) {
            return Err(ControlError::Forbidden(
                "only the sender can delete a message".to_string(),
            ));
        }
        if message.status == MessageStatus::Deleted {
            return Err(ControlError::InvalidState(format!(
                "message {message_id} is already deleted"
            )));
        }
        Ok(self
            .store
            .update_message_status(message_id, MessageStatus::Deleted)
            .await?)
    }

    async fn typing(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
        typing: bool,
    ) -> Result<()> {
        let consultation = self.load(consultation_id).await?;
        authorize_participant(&consultation, actor)?;
        if lifecycle::is_terminal(consultation.status) {
            return Err(ControlError::InvalidState(format!(
                "consultation {consultation_id} is closed"
            )));
        }

        let event = if typing {
            ServerEvent::UserTyping {
                consultation_id,
                from: actor,
            }
        } else {
            ServerEvent::UserStoppedTyping {
                consultation_id,
                from: actor,
            }
        };
        self.router
            .publish(
                &Participants::from(&consultation),
                Some(actor),
                Audience::Counterpart,
                event,
            )
            .await;
        Ok(())
    }

    async fn mark_read(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
        message_ids: Option<Vec<MessageId>>,
    ) -> Result<Vec<MessageId>> {
        let consultation = self.load(consultation_id).await?;
        authorize_participant(&consultation, actor)?;

        let read_at = Utc::now();
        let changed = self
            .store
            .mark_messages_read(consultation_id, actor.role(), message_ids, read_at)
            .await?;
        if !changed.is_empty() {
            self.router
                .publish(
                    &Participants::from(&consultation),
                    Some(actor),
                    Audience::Counterpart,
                    ServerEvent::MessagesRead {
                        consultation_id,
                        reader: actor,
                        message_ids: changed.clone(),
                        read_at,
                    },
                )
                .await;
        }
        Ok(changed)
    }

    async fn mark_staff_online(&self, staff_id: StaffId, name: Option<String>) -> Result<()> {
        match self.store.get_staff(staff_id).await? {
            None => {
                let staff = Staff {
                    id: staff_id,
                    name: name.unwrap_or_else(|| format!("staff-{staff_id}")),
                    status: StaffStatus::Online,
                    updated_at: Utc::now(),
                };
                self.store.put_staff(&staff).await?;
            }
            Some(staff) if staff.status == StaffStatus::Offline => {
                self.store
                    .update_staff_status(staff_id, StaffStatus::Online)
                    .await?;
            }
            Some(_) => {}
        }
        Ok(())
    }
}

// =============================================================================
// Trait implementation
// =============================================================================

#[async_trait]
impl<S: Store, P: PresenceStore, C: CursorStore> ConsultationControl
    for ConsultationService<S, P, C>
{
    async fn connect(
        &self,
        handle: ConnectionHandle,
        display_name: Option<String>,
    ) -> Result<Registration> {
        let identity = handle.identity();
        let registration = self.presence().register(handle).await?;

        if let Identity::Staff(staff_id) = identity {
            if let Err(e) = self.inner.mark_staff_online(staff_id, display_name).await {
                tracing::warn!(staff_id = %staff_id, error = %e, "Failed to mark staff online");
            }
        }
        Ok(registration)
    }

    async fn disconnect(&self, handle: &ConnectionHandle) {
        let identity = handle.identity();
        let went_offline = match self.presence().unregister(handle).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "Presence unregister failed");
                return;
            }
        };
        if !went_offline {
            return;
        }

        for consultation_id in self.inner.router.leave_all(identity) {
            let result = self
                .on_actor(consultation_id, move |inner| async move {
                    inner.announce_left(identity, consultation_id).await
                })
                .await;
            if let Err(e) = result {
                tracing::debug!(
                    consultation_id = %consultation_id,
                    error = %e,
                    "Failed to announce departure"
                );
            }
        }

        if let Identity::Staff(staff_id) = identity {
            if let Err(e) = self
                .inner
                .store
                .update_staff_status(staff_id, StaffStatus::Offline)
                .await
            {
                tracing::warn!(staff_id = %staff_id, error = %e, "Failed to mark staff offline");
            }
        }
    }

    async fn online_status(&self) -> Result<OnlineStatus> {
        Ok(OnlineStatus {
            users: self.presence().online_count(Role::User).await?,
            staff: self.presence().online_count(Role::Staff).await?,
        })
    }

    async fn create_consultation(
        &self,
        user_id: UserId,
        request: CreateConsultationRequest,
    ) -> Result<Consultation> {
        if let Some(existing) = self.inner.store.get_active_consultation_for_user(user_id).await? {
            return Err(ControlError::Conflict {
                existing: Box::new(existing),
            });
        }

        let staff_id = match request.requested_staff_id {
            Some(staff_id) => Some(self.inner.ensure_reachable(staff_id).await?.id),
            None => self.inner.auto_assign().await?,
        };

        let new = NewConsultation {
            user_id,
            staff_id,
            created_at: Utc::now(),
        };
        let consultation = match self.inner.store.create_consultation(new).await {
            Ok(consultation) => consultation,
            Err(StoreError::Conflict(_)) => {
                // A concurrent create for the same user won.
                let existing = self
                    .inner
                    .store
                    .get_active_consultation_for_user(user_id)
                    .await?
                    .ok_or_else(|| {
                        ControlError::Internal(format!(
                            "open consultation of user {user_id} vanished"
                        ))
                    })?;
                return Err(ControlError::Conflict {
                    existing: Box::new(existing),
                });
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            consultation_id = %consultation.id,
            user_id = %user_id,
            staff_id = ?consultation.staff_id,
            status = %consultation.status,
            "Consultation created"
        );

        self.on_actor(consultation.id, move |inner| async move {
            inner.announce_created(&consultation).await;
            Ok(consultation)
        })
        .await
    }

    async fn get_consultation(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
    ) -> Result<Consultation> {
        let consultation = self.inner.load(consultation_id).await?;
        authorize_view(&consultation, actor)?;
        Ok(consultation)
    }

    async fn list_consultations(
        &self,
        actor: Identity,
        filter: ConsultationFilter,
        page: Page,
    ) -> Result<ConsultationPage> {
        let filter = scope_listing(filter, actor);
        let page = self.inner.config.clamp_page(page);
        Ok(self.inner.store.list_consultations(&filter, page).await?)
    }

    async fn accept_consultation(
        &self,
        staff_id: StaffId,
        consultation_id: ConsultationId,
    ) -> Result<Consultation> {
        self.on_actor(consultation_id, move |inner| async move {
            inner.accept(staff_id, consultation_id).await
        })
        .await
    }

    async fn transfer_consultation(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
        request: TransferRequest,
    ) -> Result<Consultation> {
        validation::validate_reason(&request.reason)?;
        self.on_actor(consultation_id, move |inner| async move {
            inner.transfer(actor, consultation_id, request).await
        })
        .await
    }

    async fn close_consultation(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
        request: CloseRequest,
    ) -> Result<Consultation> {
        if let Some(rating) = request.rating {
            validation::validate_rating(rating)?;
        }
        if let Some(reason) = &request.reason {
            validation::validate_reason_length(reason)?;
        }
        self.on_actor(consultation_id, move |inner| async move {
            inner.close(actor, consultation_id, request).await
        })
        .await
    }

    async fn rate_consultation(
        &self,
        user_id: UserId,
        consultation_id: ConsultationId,
        request: RateRequest,
    ) -> Result<Consultation> {
        validation::validate_rating(request.rating)?;
        self.on_actor(consultation_id, move |inner| async move {
            inner.rate(user_id, consultation_id, request).await
        })
        .await
    }

    async fn join_consultation(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
    ) -> Result<Consultation> {
        self.on_actor(consultation_id, move |inner| async move {
            inner.join(actor, consultation_id).await
        })
        .await
    }

    async fn leave_consultation(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
    ) -> Result<()> {
        self.on_actor(consultation_id, move |inner| async move {
            inner.leave(actor, consultation_id).await
        })
        .await
    }

    async fn send_message(&self, actor: Identity, request: SendMessageRequest) -> Result<Message> {
        validation::validate_message(&request, self.inner.config.max_message_length)?;
        let consultation_id = request.consultation_id;
        self.on_actor(consultation_id, move |inner| async move {
            inner.send(actor, request).await
        })
        .await
    }

    async fn recall_message(&self, actor: Identity, message_id: MessageId) -> Result<Message> {
        let message = self.inner.load_message(message_id).await?;
        self.on_actor(message.consultation_id, move |inner| async move {
            inner.recall(actor, message_id).await
        })
        .await
    }

    async fn delete_message(&self, actor: Identity, message_id: MessageId) -> Result<Message> {
        let message = self.inner.load_message(message_id).await?;
        self.on_actor(message.consultation_id, move |inner| async move {
            inner.delete(actor, message_id).await
        })
        .await
    }

    async fn set_typing(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
        typing: bool,
    ) -> Result<()> {
        self.on_actor(consultation_id, move |inner| async move {
            inner.typing(actor, consultation_id, typing).await
        })
        .await
    }

    async fn mark_read(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
        message_ids: Option<Vec<MessageId>>,
    ) -> Result<Vec<MessageId>> {
        self.on_actor(consultation_id, move |inner| async move {
            inner.mark_read(actor, consultation_id, message_ids).await
        })
        .await
    }

    async fn message_history(
        &self,
        actor: Identity,
        consultation_id: ConsultationId,
        page: Page,
    ) -> Result<MessagePage> {
        let consultation = self.inner.load(consultation_id).await?;
        authorize_view(&consultation, actor)?;

        let page = self.inner.config.clamp_page(page);
        Ok(self.inner.store.list_messages(consultation_id, page).await?)
    }

    async fn unread_count(&self, actor: Identity, consultation_id: ConsultationId) -> Result<u32> {
        let consultation = self.inner.load(consultation_id).await?;
        authorize_participant(&consultation, actor)?;
        Ok(self
            .inner
            .store
            .count_unread(consultation_id, actor.role())
            .await?)
    }

    async fn available_staff(&self, exclude: Option<StaffId>) -> Result<Vec<Staff>> {
        let mut filter = StaffFilter::reachable();
        filter.exclude = exclude;
        let mut staff = self.inner.store.get_available_staff(&filter).await?;
        staff.sort_by(|a, b| {
            (a.status != StaffStatus::Online)
                .cmp(&(b.status != StaffStatus::Online))
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(staff)
    }

    async fn update_staff_status(&self, staff_id: StaffId, status: StaffStatus) -> Result<Staff> {
        let staff = match self.inner.store.update_staff_status(staff_id, status).await {
            Ok(staff) => staff,
            Err(StoreError::NotFound) => {
                return Err(ControlError::Validation(format!(
                    "unknown staff member {staff_id}"
                )))
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(staff_id = %staff_id, status = %status, "Staff status updated");

        let event = ServerEvent::StaffStatusChanged {
            staff_id,
            status,
            timestamp: Utc::now(),
        };
        if let Err(e) = self
            .inner
            .broadcast_roles(&[Role::Staff], &event, Some(Identity::Staff(staff_id)))
            .await
        {
            tracing::warn!(staff_id = %staff_id, error = %e, "Failed to announce status change");
        }
        Ok(staff)
    }

    async fn broadcast(
        &self,
        admin_id: AdminId,
        message: String,
        target: BroadcastTarget,
    ) -> Result<DeliveryReport> {
        if message.trim().is_empty() {
            return Err(ControlError::Validation(
                "broadcast message is empty".to_string(),
            ));
        }
        let from = Identity::Admin(admin_id);
        let event = ServerEvent::SystemBroadcast {
            message,
            from,
            timestamp: Utc::now(),
        };
        let report = self
            .inner
            .broadcast_roles(roles_for(target), &event, Some(from))
            .await?;

        tracing::info!(
            admin_id = %admin_id,
            target = ?target,
            delivered = report.delivered,
            "System broadcast"
        );
        Ok(report)
    }

    async fn notify(
        &self,
        admin_id: AdminId,
        notification: serde_json::Value,
        target: BroadcastTarget,
        target_id: Option<u64>,
    ) -> Result<DeliveryReport> {
        let from = Identity::Admin(admin_id);
        let event = ServerEvent::SystemNotification {
            notification,
            from,
            timestamp: Utc::now(),
        };

        let recipient = match (target, target_id) {
            (BroadcastTarget::Users, Some(id)) => Some(Identity::User(UserId::new(id))),
            (BroadcastTarget::Staff, Some(id)) => Some(Identity::Staff(StaffId::new(id))),
            (BroadcastTarget::All, Some(_)) => {
                return Err(ControlError::Validation(
                    "a single recipient needs target users or staff".to_string(),
                ))
            }
            (_, None) => None,
        };

        let report = match recipient {
            Some(identity) => {
                let mut report = DeliveryReport::default();
                report.record(self.inner.router.deliver(identity, event).await);
                report
            }
            None => {
                self.inner
                    .broadcast_roles(roles_for(target), &event, Some(from))
                    .await?
            }
        };

        tracing::info!(
            admin_id = %admin_id,
            target = ?target,
            target_id = ?target_id,
            delivered = report.delivered,
            "System notification"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_store::RocksStore;
    use tempfile::TempDir;

    fn setup() -> (ConsultationService<RocksStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        (ConsultationService::with_defaults(store), dir)
    }

    async fn add_staff(service: &ConsultationService<RocksStore>, id: u64, status: StaffStatus) {
        service
            .store()
            .put_staff(&Staff {
                id: StaffId::new(id),
                name: format!("agent-{id}"),
                status,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn consultation_lifecycle() {
        let (service, _dir) = setup();
        let user = UserId::new(1);

        // Nobody online: the consultation waits.
        let consultation = service
            .create_consultation(user, CreateConsultationRequest::auto())
            .await
            .unwrap();
        assert_eq!(consultation.status, ConsultationStatus::Waiting);
        assert!(consultation.staff_id.is_none());

        let accepted = service
            .accept_consultation(StaffId::new(7), consultation.id)
            .await
            .unwrap();
        assert_eq!(accepted.status, ConsultationStatus::Active);
        assert_eq!(accepted.staff_id, Some(StaffId::new(7)));
        assert!(accepted.accepted_at.is_some());

        let closed = service
            .close_consultation(
                Identity::Staff(StaffId::new(7)),
                consultation.id,
                CloseRequest::with_reason("done"),
            )
            .await
            .unwrap();
        assert_eq!(closed.status, ConsultationStatus::Closed);
        assert_eq!(closed.closed_by, Some(Role::Staff));

        // Closed consultations no longer block a new one.
        assert!(service
            .create_consultation(user, CreateConsultationRequest::auto())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn create_returns_existing_on_conflict() {
        let (service, _dir) = setup();
        let user = UserId::new(1);
        let first = service
            .create_consultation(user, CreateConsultationRequest::auto())
            .await
            .unwrap();

        let err = service
            .create_consultation(user, CreateConsultationRequest::auto())
            .await
            .unwrap_err();
        match err {
            ControlError::Conflict { existing } => assert_eq!(existing.id, first.id),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn requested_staff_must_be_reachable() {
        let (service, _dir) = setup();
        add_staff(&service, 3, StaffStatus::Offline).await;
        add_staff(&service, 4, StaffStatus::Busy).await;

        let err = service
            .create_consultation(UserId::new(1), CreateConsultationRequest::to_staff(StaffId::new(3)))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidTarget { .. }));

        let err = service
            .create_consultation(UserId::new(1), CreateConsultationRequest::to_staff(StaffId::new(99)))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidTarget { .. }));

        // Busy staff can still be targeted explicitly.
        let consultation = service
            .create_consultation(UserId::new(1), CreateConsultationRequest::to_staff(StaffId::new(4)))
            .await
            .unwrap();
        assert_eq!(consultation.status, ConsultationStatus::Active);
        assert_eq!(consultation.staff_id, Some(StaffId::new(4)));
    }

    #[tokio::test]
    async fn creation_records_a_system_message() {
        let (service, _dir) = setup();
        add_staff(&service, 2, StaffStatus::Online).await;

        let consultation = service
            .create_consultation(UserId::new(1), CreateConsultationRequest::auto())
            .await
            .unwrap();
        let history = service
            .message_history(Identity::User(UserId::new(1)), consultation.id, Page::default())
            .await
            .unwrap();
        assert_eq!(history.total, 1);
        assert!(history.messages[0].sender.is_none());
        assert!(history.messages[0].content.contains("agent-2"));
    }

    #[tokio::test]
    async fn outsiders_cannot_touch_a_consultation() {
        let (service, _dir) = setup();
        add_staff(&service, 2, StaffStatus::Online).await;
        let consultation = service
            .create_consultation(UserId::new(1), CreateConsultationRequest::auto())
            .await
            .unwrap();

        let stranger = Identity::User(UserId::new(50));
        let other_staff = Identity::Staff(StaffId::new(51));
        for actor in [stranger, other_staff] {
            let err = service
                .send_message(actor, SendMessageRequest::text(consultation.id, "hi"))
                .await
                .unwrap_err();
            assert!(matches!(err, ControlError::Forbidden(_)));
        }

        // Admins may observe.
        assert!(service
            .join_consultation(Identity::Admin(AdminId::new(1)), consultation.id)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn unknown_consultation_is_not_found() {
        let (service, _dir) = setup();
        let err = service
            .accept_consultation(StaffId::new(1), ConsultationId::new(404))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::NotFound(_)));
    }

    #[tokio::test]
    async fn history_page_size_is_capped() {
        let (service, _dir) = setup();
        let user = Identity::User(UserId::new(1));
        let consultation = service
            .create_consultation(UserId::new(1), CreateConsultationRequest::auto())
            .await
            .unwrap();

        let page = service
            .message_history(user, consultation.id, Page { page: 0, limit: 10_000 })
            .await
            .unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, service.config().max_page_size);
    }

    #[tokio::test]
    async fn listing_is_scoped_by_role() {
        let (service, _dir) = setup();
        let staff = StaffId::new(7);

        let assigned = service
            .create_consultation(UserId::new(1), CreateConsultationRequest::auto())
            .await
            .unwrap();
        service.accept_consultation(staff, assigned.id).await.unwrap();
        let waiting = service
            .create_consultation(UserId::new(2), CreateConsultationRequest::auto())
            .await
            .unwrap();

        let mine = service
            .list_consultations(
                Identity::User(UserId::new(2)),
                ConsultationFilter::default(),
                Page::default(),
            )
            .await
            .unwrap();
        assert_eq!(mine.total, 1);
        assert_eq!(mine.consultations[0].id, waiting.id);

        // Asking for another user's consultations still yields only the caller's.
        let spoofed = ConsultationFilter {
            user_id: Some(UserId::new(1)),
            ..ConsultationFilter::default()
        };
        let listed = service
            .list_consultations(Identity::User(UserId::new(2)), spoofed, Page::default())
            .await
            .unwrap();
        assert_eq!(listed.total, 0);

        let queue = ConsultationFilter {
            status: Some(ConsultationStatus::Waiting),
            ..ConsultationFilter::default()
        };
        let listed = service
            .list_consultations(Identity::Staff(StaffId::new(8)), queue, Page::default())
            .await
            .unwrap();
        assert_eq!(listed.consultations.len(), 1);
        assert_eq!(listed.consultations[0].id, waiting.id);

        let own = service
            .list_consultations(
                Identity::Staff(staff),
                ConsultationFilter::default(),
                Page::default(),
            )
            .await
            .unwrap();
        assert_eq!(own.total, 1);
        assert_eq!(own.consultations[0].id, assigned.id);

        let all = service
            .list_consultations(
                Identity::Admin(AdminId::new(1)),
                ConsultationFilter::default(),
                Page { page: 0, limit: 0 },
            )
            .await
            .unwrap();
        assert_eq!(all.total, 2);
        assert_eq!((all.page, all.limit), (1, 50));
    }

    #[tokio::test]
    async fn oversized_reasons_are_rejected_up_front() {
        let (service, _dir) = setup();
        let staff = Identity::Staff(StaffId::new(7));
        let reason = "x".repeat(validation::MAX_REASON_LENGTH + 1);

        let result = service
            .transfer_consultation(
                staff,
                ConsultationId::new(404),
                TransferRequest {
                    target_staff_id: StaffId::new(8),
                    reason: reason.clone(),
                },
            )
            .await;
        assert!(matches!(result, Err(ControlError::Validation(_))));

        let result = service
            .close_consultation(staff, ConsultationId::new(404), CloseRequest::with_reason(reason))
            .await;
        assert!(matches!(result, Err(ControlError::Validation(_))));
    }

    #[tokio::test]
    async fn available_staff_lists_online_before_busy() {
        let (service, _dir) = setup();
        for (id, name, status) in [
            (1, "zoe", StaffStatus::Online),
            (2, "adam", StaffStatus::Busy),
            (3, "beth", StaffStatus::Online),
            (4, "carl", StaffStatus::Offline),
        ] {
            service
                .store()
                .put_staff(&Staff {
                    id: StaffId::new(id),
                    name: name.to_string(),
                    status,
                    updated_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let names = |staff: Vec<Staff>| staff.into_iter().map(|s| s.name).collect::<Vec<_>>();
        let listed = service.available_staff(None).await.unwrap();
        assert_eq!(names(listed), vec!["beth", "zoe", "adam"]);

        let listed = service.available_staff(Some(StaffId::new(3))).await.unwrap();
        assert_eq!(names(listed), vec!["zoe", "adam"]);
    }

    #[tokio::test]
    async fn staff_presence_follows_connection() {
        let (service, _dir) = setup();
        let staff = Identity::Staff(StaffId::new(8));
        let (handle, _rx) = ConnectionHandle::new(staff);

        service
            .connect(handle.clone(), Some("Dana".to_string()))
            .await
            .unwrap();
        let record = service.store().get_staff(StaffId::new(8)).await.unwrap().unwrap();
        assert_eq!(record.name, "Dana");
        assert_eq!(record.status, StaffStatus::Online);
        assert_eq!(service.online_status().await.unwrap().staff, 1);

        service.disconnect(&handle).await;
        let record = service.store().get_staff(StaffId::new(8)).await.unwrap().unwrap();
        assert_eq!(record.status, StaffStatus::Offline);
        assert_eq!(service.online_status().await.unwrap().staff, 0);
    }

    #[tokio::test]
    async fn superseded_disconnect_keeps_staff_online() {
        let (service, _dir) = setup();
        let staff = Identity::Staff(StaffId::new(8));
        let (first, _rx1) = ConnectionHandle::new(staff);
        let (second, _rx2) = ConnectionHandle::new(staff);

        service.connect(first.clone(), None).await.unwrap();
        let registration = service.connect(second, None).await.unwrap();
        assert_eq!(registration.superseded, Some(first.id()));

        service.disconnect(&first).await;
        let record = service.store().get_staff(StaffId::new(8)).await.unwrap().unwrap();
        assert_eq!(record.status, StaffStatus::Online);
        assert!(service.presence().is_online(staff).await.unwrap());
    }

    #[tokio::test]
    async fn status_update_requires_known_staff() {
        let (service, _dir) = setup();
        let err = service
            .update_staff_status(StaffId::new(77), StaffStatus::Busy)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Validation(_)));

        add_staff(&service, 77, StaffStatus::Online).await;
        let staff = service
            .update_staff_status(StaffId::new(77), StaffStatus::Busy)
            .await
            .unwrap();
        assert_eq!(staff.status, StaffStatus::Busy);
    }
}
