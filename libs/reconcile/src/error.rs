//! Reconciliation errors.

use std::time::Duration;

use thiserror::Error;

use crate::JoinAbandoned;

/// Result type for reconciliation operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Reconciliation errors.
///
/// Cloneable so a join can hand its first recorded cause to every observer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// A cluster store call failed.
    #[error("store operation failed: {0}")]
    Store(String),

    /// A unit failed to start or stop.
    #[error("deployment of '{address}' failed: {reason}")]
    Deployment { address: String, reason: String },

    /// A required startup parameter is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A stage did not finish before its deadline.
    #[error("{stage} timed out after {elapsed:?}")]
    Timeout { stage: String, elapsed: Duration },

    /// The stored topology document could not be used.
    #[error("invalid topology: {0}")]
    Topology(String),

    /// Every reporter of a join went away before it completed.
    #[error("join abandoned after {reported} of {expected} reports")]
    Abandoned { expected: usize, reported: usize },

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReconcileError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn deployment(address: impl ToString, reason: impl ToString) -> Self {
        Self::Deployment {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<JoinAbandoned> for ReconcileError {
    fn from(abandoned: JoinAbandoned) -> Self {
        Self::Abandoned {
            expected: abandoned.expected,
            reported: abandoned.reported,
        }
    }
}
