//! # trellis-topology
//!
//! Value objects describing the desired shape of a network.
//!
//! A topology document is authored externally and written to the cluster
//! store under the network's address. Every reconciliation pass decodes a
//! fresh [`NetworkDescriptor`] from the store; descriptors are never patched
//! in place.
//!
//! ```text
//! NetworkDescriptor
//! ├── auditors: {Address}
//! ├── components: name -> ComponentDescriptor
//! │   └── instances: [InstanceDescriptor]   (wiring resolved from connections)
//! └── connections: [ConnectionDescriptor]
//! ```
//!
//! The same structural shape is written standalone under each component's
//! and each instance's own address.

mod component;
mod connection;
mod deployment;
mod error;
mod network;

pub use component::{ComponentDescriptor, InstanceDescriptor, Ports, Wiring};
pub use connection::{ConnectionDescriptor, Endpoint, Partitioner};
pub use deployment::{DeploymentSpec, UnitKind};
pub use error::TopologyError;
pub use network::{NetworkDescriptor, DEFAULT_MESSAGE_TIMEOUT_MS};

pub use trellis_id::Address;
