//! The network descriptor and its document codec.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use trellis_id::Address;

use crate::{ComponentDescriptor, ConnectionDescriptor, InstanceDescriptor, TopologyError};

/// Default time a message may stay unacknowledged before auditors time it out.
pub const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 30_000;

fn default_message_timeout_ms() -> u64 {
    DEFAULT_MESSAGE_TIMEOUT_MS
}

/// Desired shape of a whole network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    pub name: String,
    pub address: Address,
    pub status_address: Address,

    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,

    /// Support units deployed once per network.
    #[serde(default)]
    pub auditors: BTreeSet<Address>,

    /// Components keyed by name.
    #[serde(default)]
    pub components: BTreeMap<String, ComponentDescriptor>,

    #[serde(default)]
    pub connections: Vec<ConnectionDescriptor>,
}

impl NetworkDescriptor {
    /// Creates an empty network whose status key follows the address.
    pub fn new(name: &str, address: Address) -> Self {
        Self {
            name: name.to_string(),
            status_address: address.status_address(),
            address,
            message_timeout_ms: DEFAULT_MESSAGE_TIMEOUT_MS,
            auditors: BTreeSet::new(),
            components: BTreeMap::new(),
            connections: Vec::new(),
        }
    }

    /// Decodes, validates and resolves a stored document.
    pub fn from_json(json: &str) -> Result<Self, TopologyError> {
        let mut network: Self = serde_json::from_str(json)?;
        network.validate()?;
        network.resolve_wiring();
        Ok(network)
    }

    pub fn to_json(&self) -> Result<String, TopologyError> {
        serde_json::to_string(self).map_err(|e| TopologyError::Encode(e.to_string()))
    }

    pub fn component(&self, name: &str) -> Option<&ComponentDescriptor> {
        self.components.get(name)
    }

    pub fn insert_component(&mut self, component: ComponentDescriptor) {
        self.components.insert(component.name.clone(), component);
    }

    pub fn component_names(&self) -> BTreeSet<String> {
        self.components.keys().cloned().collect()
    }

    /// All instances of all components.
    pub fn instances(&self) -> impl Iterator<Item = &InstanceDescriptor> {
        self.components.values().flat_map(|c| c.instances.iter())
    }

    pub fn instance_addresses(&self) -> BTreeSet<Address> {
        self.instances().map(|i| i.address.clone()).collect()
    }

    pub fn instance_count(&self) -> usize {
        self.components.values().map(|c| c.instances.len()).sum()
    }

    /// Checks the structural invariants of the document.
    pub fn validate(&self) -> Result<(), TopologyError> {
        let mut seen: HashSet<Address> = HashSet::new();
        let mut claim = |address: &Address| -> Result<(), TopologyError> {
            if seen.insert(address.clone()) {
                Ok(())
            } else {
                Err(TopologyError::DuplicateAddress(address.clone()))
            }
        };

        check_status(&self.address, &self.status_address)?;
        claim(&self.address)?;
        claim(&self.status_address)?;
        for auditor in &self.auditors {
            claim(auditor)?;
        }

        for (key, component) in &self.components {
            if key != &component.name {
                return Err(TopologyError::ComponentNameMismatch {
                    key: key.clone(),
                    name: component.name.clone(),
                });
            }
            check_status(&component.address, &component.status_address)?;
            claim(&component.address)?;
            claim(&component.status_address)?;

            for instance in &component.instances {
                if instance.component != component.name {
                    return Err(TopologyError::InstanceOwnerMismatch {
                        instance: instance.address.clone(),
                        expected: component.name.clone(),
                        actual: instance.component.clone(),
                    });
                }
                check_status(&instance.address, &instance.status_address)?;
                claim(&instance.address)?;
                claim(&instance.status_address)?;
            }
        }

        for connection in &self.connections {
            let source = self
                .component(&connection.source.component)
                .ok_or_else(|| TopologyError::UnknownComponent(connection.source.component.clone()))?;
            if !source.ports.output.contains(&connection.source.port) {
                return Err(TopologyError::UnknownPort {
                    component: source.name.clone(),
                    port: connection.source.port.clone(),
                    direction: "output",
                });
            }

            let target = self
                .component(&connection.target.component)
                .ok_or_else(|| TopologyError::UnknownComponent(connection.target.component.clone()))?;
            if !target.ports.input.contains(&connection.target.port) {
                return Err(TopologyError::UnknownPort {
                    component: target.name.clone(),
                    port: connection.target.port.clone(),
                    direction: "input",
                });
            }
        }

        Ok(())
    }

    /// Rebuilds every instance's port wiring from the connection list.
    ///
    /// Idempotent: existing wiring is discarded first.
    pub fn resolve_wiring(&mut self) {
        for component in self.components.values_mut() {
            for instance in &mut component.instances {
                instance.input.clear();
                instance.output.clear();
            }
        }

        for connection in &self.connections {
            if let Some(source) = self.components.get_mut(&connection.source.component) {
                for instance in &mut source.instances {
                    instance
                        .output
                        .entry(connection.source.port.clone())
                        .or_default()
                        .push(connection.clone());
                }
            }
            if let Some(target) = self.components.get_mut(&connection.target.component) {
                for instance in &mut target.instances {
                    instance
                        .input
                        .entry(connection.target.port.clone())
                        .or_default()
                        .push(connection.clone());
                }
            }
        }
    }
}

/// A status key must be its resource address plus the status suffix.
fn check_status(address: &Address, status: &Address) -> Result<(), TopologyError> {
    let expected = address.status_address();
    if status == &expected {
        Ok(())
    } else {
        Err(TopologyError::StatusAddressMismatch {
            address: address.clone(),
            expected,
            actual: status.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeploymentSpec, Endpoint, Partitioner};
    use rstest::rstest;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn pipeline() -> NetworkDescriptor {
        let mut network = NetworkDescriptor::new("n", addr("n"));
        network.auditors.insert(addr("n.aud"));

        let mut source = ComponentDescriptor::new(
            &network.address,
            "source",
            DeploymentSpec::Service { main: "source.rs".into() },
            1,
        )
        .unwrap();
        source.ports.output.insert("out".into());

        let mut sink = ComponentDescriptor::new(
            &network.address,
            "sink",
            DeploymentSpec::Worker { main: "sink.rs".into() },
            2,
        )
        .unwrap();
        sink.ports.input.insert("in".into());

        network.insert_component(source);
        network.insert_component(sink);
        network.connections.push(ConnectionDescriptor::new(
            Endpoint::new("source", "out"),
            Endpoint::new("sink", "in"),
            Partitioner::Hash {
                header: "key".into(),
            },
        ));
        network
    }

    #[test]
    fn test_valid_pipeline() {
        let network = pipeline();
        network.validate().unwrap();
        assert_eq!(network.instance_count(), 3);
        assert_eq!(
            network.instance_addresses(),
            [addr("n.sink-1"), addr("n.sink-2"), addr("n.source-1")]
                .into_iter()
                .collect()
        );
    }

    #[test]
    fn test_document_roundtrip_resolves_wiring() {
        let network = pipeline();
        let decoded = NetworkDescriptor::from_json(&network.to_json().unwrap()).unwrap();

        let source = &decoded.component("source").unwrap().instances[0];
        assert_eq!(source.output["out"].len(), 1);
        assert!(source.input.is_empty());

        let sink = decoded.component("sink").unwrap();
        assert!(sink.instances.iter().all(|i| i.input["in"].len() == 1));
    }

    #[test]
    fn test_resolve_wiring_is_idempotent() {
        let mut network = pipeline();
        network.resolve_wiring();
        let once = network.clone();
        network.resolve_wiring();
        assert_eq!(network, once);
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let mut network = pipeline();
        network.auditors.insert(addr("n.sink-1"));
        assert_eq!(
            network.validate().unwrap_err(),
            TopologyError::DuplicateAddress(addr("n.sink-1"))
        );
    }

    #[test]
    fn test_unknown_component_rejected() {
        let mut network = pipeline();
        network.connections.push(ConnectionDescriptor::new(
            Endpoint::new("source", "out"),
            Endpoint::new("missing", "in"),
            Partitioner::All,
        ));
        assert_eq!(
            network.validate().unwrap_err(),
            TopologyError::UnknownComponent("missing".into())
        );
    }

    #[test]
    fn test_undeclared_port_rejected() {
        let mut network = pipeline();
        network.connections.push(ConnectionDescriptor::new(
            Endpoint::new("sink", "in"),
            Endpoint::new("source", "out"),
            Partitioner::Random,
        ));
        assert!(matches!(
            network.validate().unwrap_err(),
            TopologyError::UnknownPort { direction: "output", .. }
        ));
    }

    #[test]
    fn test_owner_mismatch_rejected() {
        let mut network = pipeline();
        if let Some(sink) = network.components.get_mut("sink") {
            sink.instances[0].component = "source".into();
        }
        assert!(matches!(
            network.validate().unwrap_err(),
            TopologyError::InstanceOwnerMismatch { .. }
        ));
    }

    #[rstest]
    #[case::network("n")]
    #[case::component("n.sink")]
    #[case::instance("n.sink-2")]
    fn test_foreign_status_address_rejected(#[case] target: &str) {
        let mut network = pipeline();
        let foreign = addr("n.ready");
        match target {
            "n" => network.status_address = foreign.clone(),
            "n.sink" => {
                if let Some(sink) = network.components.get_mut("sink") {
                    sink.status_address = foreign.clone();
                }
            }
            _ => {
                if let Some(sink) = network.components.get_mut("sink") {
                    sink.instances[1].status_address = foreign.clone();
                }
            }
        }

        assert_eq!(
            network.validate().unwrap_err(),
            TopologyError::StatusAddressMismatch {
                address: addr(target),
                expected: addr(target).status_address(),
                actual: foreign,
            }
        );
        assert!(NetworkDescriptor::from_json(&network.to_json().unwrap()).is_err());
    }

    #[test]
    fn test_defaults_when_decoding_minimal_document() {
        let network = NetworkDescriptor::from_json(
            r#"{"name": "n", "address": "n", "status_address": "n.__status"}"#,
        )
        .unwrap();
        assert_eq!(network.message_timeout_ms, DEFAULT_MESSAGE_TIMEOUT_MS);
        assert!(network.auditors.is_empty());
        assert!(network.components.is_empty());
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            NetworkDescriptor::from_json("{").unwrap_err(),
            TopologyError::Decode(_)
        ));
    }
}
