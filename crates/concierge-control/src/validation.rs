//! Payload checks applied before anything reaches a consultation actor.

use chrono::{DateTime, Duration, Utc};
use concierge_store::MessageType;

use crate::error::{ControlError, Result};
use crate::types::SendMessageRequest;

/// Longest transfer or close reason accepted, in characters.
pub const MAX_REASON_LENGTH: usize = 500;

/// Validate a message a participant wants to send.
///
/// # Errors
///
/// Returns `ControlError::Validation` if the content is empty or longer than
/// `max_length` characters, if a client tries to send a system message, or if
/// `extra` is not a JSON object.
pub fn validate_message(request: &SendMessageRequest, max_length: usize) -> Result<()> {
    if request.message_type == MessageType::System {
        return Err(ControlError::Validation(
            "system messages cannot be sent by participants".to_string(),
        ));
    }
    if request.content.trim().is_empty() {
        return Err(ControlError::Validation("message content is empty".to_string()));
    }
    let length = request.content.chars().count();
    if length > max_length {
        return Err(ControlError::Validation(format!(
            "message content is {length} characters; the limit is {max_length}"
        )));
    }
    if let Some(extra) = &request.extra {
        if !extra.is_object() {
            return Err(ControlError::Validation("extra must be a JSON object".to_string()));
        }
    }
    Ok(())
}

/// Validate a rating.
///
/// # Errors
///
/// Returns `ControlError::Validation` if `rating` is outside `1..=5`.
pub fn validate_rating(rating: u8) -> Result<()> {
    if (1..=5).contains(&rating) {
        Ok(())
    } else {
        Err(ControlError::Validation(format!(
            "rating must be between 1 and 5, got {rating}"
        )))
    }
}

/// Validate a free-text reason that must not be blank.
///
/// # Errors
///
/// Returns `ControlError::Validation` if `reason` is blank or longer than
/// [`MAX_REASON_LENGTH`] characters.
pub fn validate_reason(reason: &str) -> Result<()> {
    if reason.trim().is_empty() {
        return Err(ControlError::Validation("a reason is required".to_string()));
    }
    validate_reason_length(reason)
}

/// Validate an optional reason, which may be blank but not oversized.
///
/// # Errors
///
/// Returns `ControlError::Validation` if `reason` is longer than
/// [`MAX_REASON_LENGTH`] characters.
pub fn validate_reason_length(reason: &str) -> Result<()> {
    let length = reason.chars().count();
    if length > MAX_REASON_LENGTH {
        return Err(ControlError::Validation(format!(
            "reason is {length} characters; the limit is {MAX_REASON_LENGTH}"
        )));
    }
    Ok(())
}

/// Whether a message created at `created_at` can still be recalled at `now`.
///
/// The window is inclusive: exactly `window_seconds` after creation still counts.
/// A window too large to represent never closes.
#[must_use]
pub fn recall_window_open(created_at: DateTime<Utc>, now: DateTime<Utc>, window_seconds: u64) -> bool {
    match i64::try_from(window_seconds).ok().and_then(Duration::try_seconds) {
        Some(window) => now.signed_duration_since(created_at) <= window,
        None => true,
    }
}
