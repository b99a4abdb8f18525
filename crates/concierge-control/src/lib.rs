//! Consultation control for concierge.
//!
//! This crate provides the business logic of a consultation: its lifecycle, the
//! messages exchanged in it, and the bookkeeping that happens when participants
//! connect and disconnect. It coordinates between the storage layer and the
//! router.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Gateway (WebSocket / REST)                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ConsultationService                      │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Lifecycle  │ │  Messages   │ │  Consultation       │    │
//! │  │  + policy   │ │  + recall   │ │  actors (1/id)      │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────┐   ┌──────────────┐
//!        │  Store   │   │ Presence │   │  Fan-out     │
//!        │ (RocksDB)│   │ registry │   │  router      │
//!        └──────────┘   └──────────┘   └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use concierge_control::{ConsultationControl, ConsultationService, CreateConsultationRequest};
//! use concierge_core::UserId;
//! use concierge_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/concierge")?);
//! let service = ConsultationService::with_defaults(store);
//!
//! let consultation = service
//!     .create_consultation(UserId::new(1), CreateConsultationRequest::auto())
//!     .await?;
//! println!("Opened consultation {} ({})", consultation.id, consultation.status);
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Transitions and fan-out for one consultation run on that consultation's actor
//! (see [`actor`]), so two staff members racing to accept the same waiting
//! consultation are serialized: one wins, the other gets
//! [`ControlError::InvalidState`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod actor;
pub mod error;
pub mod lifecycle;
pub mod service;
pub mod types;
pub mod validation;

pub use actor::ActorRegistry;
pub use error::{ControlError, Result};
pub use service::{ConsultationControl, ConsultationService};
pub use types::{
    CloseRequest, ControlConfig, CreateConsultationRequest, OnlineStatus, RateRequest,
    SendMessageRequest, TransferRequest,
};

// Re-export commonly used types from dependencies for convenience
pub use concierge_core::{ConsultationId, Identity, MessageId, Role, StaffId, UserId};
pub use concierge_store::{Consultation, ConsultationStatus, Message, MessageStatus, MessageType};
