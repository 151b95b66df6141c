//! Error types for event handling.

use thiserror::Error;

/// Errors that can occur when reading an event's payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The event carries no value.
    #[error("{kind} event for '{key}' carries no value")]
    MissingValue { key: String, kind: String },

    /// The payload could not be decoded.
    #[error("invalid payload for '{key}': {message}")]
    InvalidPayload { key: String, message: String },
}
