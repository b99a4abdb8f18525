//! Key encoding utilities for `RocksDB`.
//!
//! All ids are encoded big-endian so prefix scans return records in id order.

use concierge_core::{ConsultationId, MessageId, StaffId, UserId};

use crate::error::{Result, StoreError};

/// Encode a consultation key.
#[must_use]
pub fn consultation_key(id: ConsultationId) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

/// Encode an open-consultation index key (just the user id).
#[must_use]
pub fn open_by_user_key(user_id: UserId) -> Vec<u8> {
    user_id.to_be_bytes().to_vec()
}

/// Encode a staff-consultation index key: `staff_id || consultation_id`.
#[must_use]
pub fn staff_consultation_key(staff_id: StaffId, consultation_id: ConsultationId) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&staff_id.to_be_bytes());
    key.extend_from_slice(&consultation_id.to_be_bytes());
    key
}

/// Encode a staff prefix for scanning all active consultations of a staff member.
#[must_use]
pub fn staff_prefix(staff_id: StaffId) -> Vec<u8> {
    staff_id.to_be_bytes().to_vec()
}

/// Encode a message key.
#[must_use]
pub fn message_key(id: MessageId) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

/// Encode a consultation-message index key: `consultation_id || message_id`.
#[must_use]
pub fn consultation_message_key(consultation_id: ConsultationId, message_id: MessageId) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&consultation_id.to_be_bytes());
    key.extend_from_slice(&message_id.to_be_bytes());
    key
}

/// Encode a consultation prefix for scanning its messages.
#[must_use]
pub fn consultation_prefix(consultation_id: ConsultationId) -> Vec<u8> {
    consultation_id.to_be_bytes().to_vec()
}

/// Extract the message ID from a consultation-message key.
///
/// # Errors
///
/// Returns an error if the key is not exactly 16 bytes.
pub fn extract_message_id(key: &[u8]) -> Result<MessageId> {
    key.get(8..16)
        .filter(|_| key.len() == 16)
        .ok_or_else(|| StoreError::Database(format!("malformed message index key: {key:?}")))
        .and_then(|bytes| {
            MessageId::from_be_slice(bytes).map_err(|e| StoreError::Database(e.to_string()))
        })
}

/// Encode a staff key.
#[must_use]
pub fn staff_key(id: StaffId) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

/// Encode a status-staff index key: `status || staff_id`.
#[must_use]
pub fn status_staff_key(status: u8, staff_id: StaffId) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(status);
    key.extend_from_slice(&staff_id.to_be_bytes());
    key
}

/// Extract the staff ID from a status-staff key.
///
/// # Errors
///
/// Returns an error if the key is not exactly 9 bytes.
pub fn extract_staff_id(key: &[u8]) -> Result<StaffId> {
    key.get(1..9)
        .filter(|_| key.len() == 9)
        .ok_or_else(|| StoreError::Database(format!("malformed staff index key: {key:?}")))
        .and_then(|bytes| {
            StaffId::from_be_slice(bytes).map_err(|e| StoreError::Database(e.to_string()))
        })
}
