//! Presence, assignment and fan-out for concierge.
//!
//! This crate holds the routing pieces that sit between live connections and the
//! consultation state machine:
//!
//! - **Presence registry**: which identity is online, and through which connection
//! - **Assignment policy**: which staff member gets a new consultation
//! - **Fan-out router**: who receives an event about a consultation
//! - **Event vocabulary**: every frame the server pushes to clients
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Consultation actors                        │
//! └─────────────────────────────────────────────────────────────────┘
//!               │ choose()                      │ publish()
//!               ▼                               ▼
//! ┌───────────────────────┐       ┌───────────────────────────────┐
//! │   AssignmentPolicy    │       │         FanoutRouter          │
//! │  ┌─────────────────┐  │       │  recipients() → lookup()      │
//! │  │  CursorStore    │  │       │  channel membership           │
//! │  └─────────────────┘  │       └───────────────┬───────────────┘
//! └───────────────────────┘                       │
//!                                                 ▼
//!                                 ┌───────────────────────────────┐
//!                                 │       PresenceRegistry        │
//!                                 │  ┌──────────────┐ ┌────────┐  │
//!                                 │  │PresenceStore │ │ local  │  │
//!                                 │  │identity → id │ │handles │  │
//!                                 │  └──────────────┘ └────────┘  │
//!                                 └───────────────┬───────────────┘
//!                                                 ▼
//!                                        ConnectionHandle (mpsc)
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use concierge_core::{ConsultationId, Identity, StaffId, UserId};
//! use concierge_router::{
//!     Audience, ConnectionHandle, FanoutRouter, Participants, PresenceRegistry, ServerEvent,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let presence = Arc::new(PresenceRegistry::in_memory());
//! let router = FanoutRouter::new(Arc::clone(&presence));
//!
//! let staff = Identity::Staff(StaffId::new(5));
//! let (handle, mut events) = ConnectionHandle::new(staff);
//! presence.register(handle).await?;
//!
//! let user = Identity::User(UserId::new(1));
//! let participants = Participants {
//!     consultation_id: ConsultationId::new(1),
//!     user_id: UserId::new(1),
//!     staff_id: Some(StaffId::new(5)),
//! };
//! let typing = ServerEvent::UserTyping { consultation_id: participants.consultation_id, from: user };
//! router.publish(&participants, Some(user), Audience::Counterpart, typing).await;
//!
//! assert!(events.recv().await.is_some());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod assignment;
pub mod connection;
pub mod error;
pub mod events;
pub mod fanout;
pub mod presence;

pub use assignment::{
    round_robin_step, select, AssignmentPolicy, Candidate, CursorStore, MemoryCursorStore,
    Strategy,
};
pub use connection::ConnectionHandle;
pub use error::{Result, RouterError};
pub use events::{BroadcastTarget, ServerEvent};
pub use fanout::{recipients, Audience, DeliveryReport, FanoutRouter, Participants};
pub use presence::{MemoryPresenceStore, PresenceRegistry, PresenceStore, Registration};
