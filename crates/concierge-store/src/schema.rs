//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary consultation records, keyed by `consultation_id`.
    pub const CONSULTATIONS: &str = "consultations";

    /// Index: the single open (waiting or active) consultation per user,
    /// keyed by `user_id`, value `consultation_id`.
    pub const OPEN_BY_USER: &str = "consultations_open_by_user";

    /// Index: active consultations by staff, keyed by `staff_id || consultation_id`.
    pub const ACTIVE_BY_STAFF: &str = "consultations_active_by_staff";

    /// Primary message records, keyed by `message_id`.
    pub const MESSAGES: &str = "messages";

    /// Index: messages by consultation, keyed by `consultation_id || message_id`.
    pub const MESSAGES_BY_CONSULTATION: &str = "messages_by_consultation";

    /// Staff records, keyed by `staff_id`.
    pub const STAFF: &str = "staff";

    /// Index: staff by status, keyed by `status || staff_id`.
    pub const STAFF_BY_STATUS: &str = "staff_by_status";

    /// Id sequences, keyed by sequence name.
    pub const META: &str = "meta";
}

/// Sequence names stored in [`cf::META`].
pub mod seq {
    /// Next consultation id.
    pub const CONSULTATION: &[u8] = b"seq:consultation";

    /// Next message id.
    pub const MESSAGE: &[u8] = b"seq:message";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::CONSULTATIONS,
        cf::OPEN_BY_USER,
        cf::ACTIVE_BY_STAFF,
        cf::MESSAGES,
        cf::MESSAGES_BY_CONSULTATION,
        cf::STAFF,
        cf::STAFF_BY_STATUS,
        cf::META,
    ]
}
