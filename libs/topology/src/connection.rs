//! Connections between component ports.

use serde::{Deserialize, Serialize};

/// One side of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub component: String,
    pub port: String,
}

impl Endpoint {
    pub fn new(component: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            port: port.into(),
        }
    }
}

/// Selects which target instance(s) receive an outbound message.
///
/// Only the selector is described here; routing happens in the data plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Partitioner {
    #[default]
    RoundRobin,
    Random,
    Hash { header: String },
    All,
    Custom { selector: String },
}

/// A directed link from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub source: Endpoint,
    pub target: Endpoint,
    #[serde(default)]
    pub partitioner: Partitioner,
}

impl ConnectionDescriptor {
    pub fn new(source: Endpoint, target: Endpoint, partitioner: Partitioner) -> Self {
        Self {
            source,
            target,
            partitioner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partitioner_encoding() {
        let hash = Partitioner::Hash {
            header: "customer".into(),
        };
        let json = serde_json::to_value(&hash).unwrap();
        assert_eq!(json, serde_json::json!({"type": "hash", "header": "customer"}));

        let rr: Partitioner = serde_json::from_value(serde_json::json!({"type": "round-robin"})).unwrap();
        assert_eq!(rr, Partitioner::RoundRobin);
    }

    #[test]
    fn test_partitioner_defaults_to_round_robin() {
        let conn: ConnectionDescriptor = serde_json::from_value(serde_json::json!({
            "source": {"component": "a", "port": "out"},
            "target": {"component": "b", "port": "in"},
        }))
        .unwrap();
        assert_eq!(conn.partitioner, Partitioner::RoundRobin);
    }
}
