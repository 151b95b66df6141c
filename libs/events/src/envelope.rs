//! The envelope delivered to store watchers.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use trellis_id::Address;

use crate::{EventError, EventKind};

/// A single change notification for a watched key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEvent {
    /// Store-wide monotonic revision of the change.
    pub revision: u64,

    /// The key that changed.
    pub key: Address,

    /// What happened.
    pub kind: EventKind,

    /// New value for create/update, previous value for delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// When the store emitted the event.
    pub observed_at: DateTime<Utc>,
}

impl StoreEvent {
    pub fn new(revision: u64, key: Address, kind: EventKind, value: Option<String>) -> Self {
        Self {
            revision,
            key,
            kind,
            value,
            observed_at: Utc::now(),
        }
    }

    /// Returns the raw payload or an error if the event carries none.
    pub fn value(&self) -> Result<&str, EventError> {
        self.value.as_deref().ok_or_else(|| EventError::MissingValue {
            key: self.key.to_string(),
            kind: self.kind.to_string(),
        })
    }

    /// Decodes the JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EventError> {
        serde_json::from_str(self.value()?).map_err(|e| EventError::InvalidPayload {
            key: self.key.to_string(),
            message: e.to_string(),
        })
    }
}
