//! Event kinds.

use serde::{Deserialize, Serialize};

/// What happened to a watched key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The key did not exist and was written.
    Create,
    /// The key existed and was written again (possibly with the same value).
    Update,
    /// The key existed and was removed.
    Delete,
}

impl EventKind {
    /// Returns true if after this event the key exists.
    pub fn key_exists(&self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::Create => "create",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}
