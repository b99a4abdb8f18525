//! Core types and utilities for concierge.
//!
//! This crate provides the foundational types used throughout the consultation routing
//! platform:
//!
//! - **Identifiers**: Strongly-typed IDs for users, staff, admins, consultations,
//!   messages and live connections
//! - **Identity**: The authenticated `(role, id)` pair bound to every connection
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use concierge_core::{ConnectionId, Identity, Role, StaffId, UserId};
//!
//! let user = Identity::User(UserId::new(7));
//! assert_eq!(user.role(), Role::User);
//!
//! let staff: StaffId = "42".parse().unwrap();
//! assert_eq!(staff.get(), 42);
//!
//! // Every transport session gets a fresh handle
//! let connection = ConnectionId::generate();
//! assert_ne!(connection, ConnectionId::generate());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod identity;
pub mod ids;

pub use error::{CoreError, Result};
pub use identity::{Identity, Role, StaffStatus};
pub use ids::{AdminId, ConnectionId, ConsultationId, IdError, MessageId, StaffId, UserId};
