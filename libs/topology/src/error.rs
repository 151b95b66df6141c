//! Topology decoding and validation errors.

use thiserror::Error;
use trellis_id::Address;

/// Errors raised while decoding or validating a topology document.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// The document is not valid JSON for this shape.
    #[error("failed to decode topology document: {0}")]
    Decode(String),

    /// A descriptor could not be encoded.
    #[error("failed to encode descriptor: {0}")]
    Encode(String),

    /// Two resources of the network share an address.
    #[error("address '{0}' is used more than once")]
    DuplicateAddress(Address),

    /// A status key does not follow the address it belongs to.
    #[error("status key of '{address}' must be '{expected}', got '{actual}'")]
    StatusAddressMismatch {
        address: Address,
        expected: Address,
        actual: Address,
    },

    /// A component is stored under a key different from its name.
    #[error("component '{name}' is stored under key '{key}'")]
    ComponentNameMismatch { key: String, name: String },

    /// An instance claims a different owning component.
    #[error("instance '{instance}' belongs to '{actual}' but is listed under '{expected}'")]
    InstanceOwnerMismatch {
        instance: Address,
        expected: String,
        actual: String,
    },

    /// A connection references a component that does not exist.
    #[error("connection references unknown component '{0}'")]
    UnknownComponent(String),

    /// A connection references a port the component does not declare.
    #[error("connection references undeclared {direction} port '{port}' on '{component}'")]
    UnknownPort {
        component: String,
        port: String,
        direction: &'static str,
    },
}

impl From<serde_json::Error> for TopologyError {
    fn from(err: serde_json::Error) -> Self {
        TopologyError::Decode(err.to_string())
    }
}
