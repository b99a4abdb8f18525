//! HTTP request handlers.
//!
//! This module contains all the endpoint handlers for the gateway API.

pub mod admin;
pub mod consultations;
pub mod health;
pub mod messages;
pub mod session;
pub mod staff;
pub mod ws;

use std::str::FromStr;

use crate::error::ApiError;

/// Parse an identifier taken from a path segment.
pub(crate) fn parse_id<T: FromStr>(kind: &str, raw: &str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid {kind} ID: {raw}")))
}
