//! Durable storage layer for concierge.
//!
//! This crate provides persistent storage for consultations, messages and staff
//! availability. The routing core only talks to the [`Store`] trait; every call is
//! asynchronous so connection handlers keep being served while a write is in flight.
//!
//! # Architecture
//!
//! [`RocksStore`] uses the following column families:
//!
//! - `consultations`: Primary consultation records, keyed by `consultation_id`
//! - `consultations_open_by_user`: The single open consultation per user
//! - `consultations_active_by_staff`: Active consultations per staff member
//! - `messages`: Primary message records, keyed by `message_id`
//! - `messages_by_consultation`: Index for paginated history reads
//! - `staff`: Staff records, keyed by `staff_id`
//! - `staff_by_status`: Index for availability queries
//! - `meta`: Id sequences
//!
//! # Example
//!
//! ```no_run
//! use concierge_store::{RocksStore, Store, StaffFilter};
//!
//! # async fn run() -> concierge_store::Result<()> {
//! let store = RocksStore::open("/tmp/concierge-db")?;
//!
//! // Staff eligible for automatic assignment
//! let online = store.get_available_staff(&StaffFilter::assignable()).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;
pub use rocks::RocksStore;
pub use types::{
    Consultation, ConsultationFilter, ConsultationPage, ConsultationStatus, Message, MessagePage, MessageStatus, MessageType,
    NewConsultation, NewMessage, Page, Staff, StaffFilter, TransferRecord,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use concierge_core::{ConsultationId, MessageId, Role, StaffId, StaffStatus, UserId};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // =========================================================================
    // Consultation Operations
    // =========================================================================

    /// Insert a new consultation and assign its id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the user already has an open consultation.
    async fn create_consultation(&self, new: NewConsultation) -> Result<Consultation>;

    /// Get a consultation by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_consultation(&self, id: ConsultationId) -> Result<Option<Consultation>>;

    /// Persist a state change of an existing consultation.
    ///
    /// Maintains the open-by-user and active-by-staff indexes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the consultation doesn't exist.
    async fn update_consultation(&self, consultation: &Consultation) -> Result<()>;

    /// Get the waiting or active consultation of a user, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_active_consultation_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Consultation>>;

    /// List consultations matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_consultations(
        &self,
        filter: &ConsultationFilter,
        page: Page,
    ) -> Result<ConsultationPage>;

    /// Count consultations currently `active` with the given staff member.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn count_active_consultations(&self, staff_id: StaffId) -> Result<u32>;

    // =========================================================================
    // Message Operations
    // =========================================================================

    /// Commit a message and assign its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn create_message(&self, new: NewMessage) -> Result<Message>;

    /// Get a message by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_message(&self, id: MessageId) -> Result<Option<Message>>;

    /// Change the status of a message and return the updated record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the message doesn't exist.
    async fn update_message_status(&self, id: MessageId, status: MessageStatus)
        -> Result<Message>;

    /// Read one page of a consultation's history, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_messages(&self, consultation_id: ConsultationId, page: Page)
        -> Result<MessagePage>;

    /// Mark messages as read by `reader`.
    ///
    /// Only messages that are unread for the reader's role are touched. When `ids` is
    /// `None` every such message in the consultation is marked. Returns the ids that
    /// changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn mark_messages_read(
        &self,
        consultation_id: ConsultationId,
        reader: Role,
        ids: Option<Vec<MessageId>>,
        at: DateTime<Utc>,
    ) -> Result<Vec<MessageId>>;

    /// Count messages in a consultation that are unread for `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn count_unread(&self, consultation_id: ConsultationId, reader: Role) -> Result<u32>;

    // =========================================================================
    // Staff Operations
    // =========================================================================

    /// Insert or update a staff record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_staff(&self, staff: &Staff) -> Result<()>;

    /// Get a staff record by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_staff(&self, id: StaffId) -> Result<Option<Staff>>;

    /// List staff matching `filter`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_available_staff(&self, filter: &StaffFilter) -> Result<Vec<Staff>>;

    /// Update a staff member's availability and return the updated record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the staff member doesn't exist.
    async fn update_staff_status(&self, id: StaffId, status: StaffStatus) -> Result<Staff>;
}
