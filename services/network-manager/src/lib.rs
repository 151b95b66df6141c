//! trellis Network Manager Library
//!
//! The network manager reconciles data-flow topologies stored in the cluster
//! store against what actually runs on the cluster. It deploys, updates and
//! tears down units, and publishes an aggregate readiness key per network.
//!
//! ## Architecture
//!
//! The manager uses an actor-based supervision tree:
//!
//! ```text
//! ManagerSupervisor
//! └── NetworkReconciler(address)   (one per managed network)
//!       ├── watch: network topology key
//!       └── watch: instance status keys
//! ```
//!
//! Deployed instances run a `ComponentCoordinator`, which signals instance
//! readiness and reacts to network readiness.
//!
//! ## Modules
//!
//! - `actors`: Actor framework and the manager supervisor
//! - `cluster`: Cluster store interface and local in-memory cluster
//! - `reconciler`: The per-network reconciliation state machine
//! - `coordinator`: Instance-side readiness coordination

pub mod actors;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod reconciler;

// Re-export commonly used types
pub use actors::ManagerSupervisor;
pub use cluster::{ClusterStore, DeployRequest, LocalCluster, StoreError, WatchHandler};
pub use config::{Config, ConfigError};
pub use coordinator::{ComponentCoordinator, CoordinatorError};
pub use reconciler::{
    NetworkReconciler, PassKind, PassOutcome, ReconcilerConfig, ReconcilerHandle, ReconcilerSnapshot,
};
