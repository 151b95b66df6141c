//! Kind-specific deployment specs.

use serde::{Deserialize, Serialize};

/// How a component's instances are started on the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DeploymentSpec {
    /// Event-loop unit identified by its entry point.
    Service { main: String },
    /// Unit run on the blocking worker pool.
    Worker { main: String },
    /// Worker unit whose handlers may run concurrently.
    MultithreadedWorker { main: String },
    /// Packaged unit identified by its module name.
    Module { module: String },
}

impl DeploymentSpec {
    /// The store-level unit kind this spec deploys as.
    pub fn unit_kind(&self) -> UnitKind {
        match self {
            Self::Service { .. } => UnitKind::Service,
            Self::Worker { .. } | Self::MultithreadedWorker { .. } => UnitKind::Worker,
            Self::Module { .. } => UnitKind::Module,
        }
    }

    /// Entry point or module identifier handed to the cluster.
    pub fn unit(&self) -> &str {
        match self {
            Self::Service { main } | Self::Worker { main } | Self::MultithreadedWorker { main } => {
                main
            }
            Self::Module { module } => module,
        }
    }

    pub fn is_multithreaded(&self) -> bool {
        matches!(self, Self::MultithreadedWorker { .. })
    }
}

/// Unit kinds understood by the cluster's deploy and undeploy primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Service,
    Worker,
    Module,
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnitKind::Service => "service",
            UnitKind::Worker => "worker",
            UnitKind::Module => "module",
        };
        write!(f, "{}", s)
    }
}
