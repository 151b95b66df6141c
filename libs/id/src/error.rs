//! Error types for address and ID parsing.

use thiserror::Error;

/// Errors that can occur when parsing or validating addresses and IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The input string is empty.
    #[error("identifier cannot be empty")]
    Empty,

    /// The ID has an invalid prefix.
    #[error("invalid ID prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    /// The ID is missing the underscore separator.
    #[error("ID missing underscore separator")]
    MissingSeparator,

    /// The ULID portion of the ID is invalid.
    #[error("invalid ULID: {0}")]
    InvalidUlid(String),

    /// An address contains an empty segment (`a..b`, leading or trailing dot).
    #[error("address '{0}' contains an empty segment")]
    EmptySegment(String),

    /// An address contains whitespace or control characters.
    #[error("address '{0}' contains whitespace or control characters")]
    InvalidCharacter(String),
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }

    /// Returns true if this error came from address validation.
    pub fn is_address_error(&self) -> bool {
        matches!(
            self,
            IdError::EmptySegment(_) | IdError::InvalidCharacter(_)
        )
    }
}
