//! Component and instance descriptors.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use trellis_id::Address;

use crate::{ConnectionDescriptor, DeploymentSpec, TopologyError};

/// Port name -> connections attached to it.
pub type Wiring = BTreeMap<String, Vec<ConnectionDescriptor>>;

/// Ports a component declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ports {
    #[serde(default)]
    pub input: BTreeSet<String>,
    #[serde(default)]
    pub output: BTreeSet<String>,
}

/// Desired shape of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub name: String,
    pub address: Address,
    pub status_address: Address,

    /// Cluster deployment group the instances are placed in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    pub deployment: DeploymentSpec,

    #[serde(default)]
    pub ports: Ports,

    /// Opaque configuration handed to every instance.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,

    #[serde(default)]
    pub instances: Vec<InstanceDescriptor>,
}

impl ComponentDescriptor {
    /// Creates a component laid out under the network's address.
    ///
    /// The component lives at `{network}.{name}` and instance `i` (1-based)
    /// at `{network}.{name}-{i}`, each with its own status key.
    pub fn new(
        network: &Address,
        name: &str,
        deployment: DeploymentSpec,
        instances: u32,
    ) -> Result<Self, TopologyError> {
        let address = network
            .child(name)
            .map_err(|e| TopologyError::Decode(e.to_string()))?;
        let instances = (1..=instances)
            .map(|number| InstanceDescriptor::new(network, name, number))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: name.to_string(),
            status_address: address.status_address(),
            address,
            group: None,
            deployment,
            ports: Ports::default(),
            config: serde_json::Value::Null,
            instances,
        })
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn to_json(&self) -> Result<String, TopologyError> {
        serde_json::to_string(self).map_err(|e| TopologyError::Encode(e.to_string()))
    }
}

/// Desired shape of one running unit of a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub address: Address,
    pub status_address: Address,

    /// Name of the owning component.
    pub component: String,

    /// 1-based position within the component.
    pub number: u32,

    #[serde(default)]
    pub input: Wiring,

    #[serde(default)]
    pub output: Wiring,
}

impl InstanceDescriptor {
    pub fn new(network: &Address, component: &str, number: u32) -> Result<Self, TopologyError> {
        let address = network
            .child(&format!("{}-{}", component, number))
            .map_err(|e| TopologyError::Decode(e.to_string()))?;
        Ok(Self {
            status_address: address.status_address(),
            address,
            component: component.to_string(),
            number,
            input: Wiring::new(),
            output: Wiring::new(),
        })
    }

    pub fn to_json(&self) -> Result<String, TopologyError> {
        serde_json::to_string(self).map_err(|e| TopologyError::Encode(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, TopologyError> {
        Ok(serde_json::from_str(json)?)
    }
}
