//! Manager supervisor - root supervisor for network reconcilers.
//!
//! The ManagerSupervisor:
//! - Is the root of the supervision tree
//! - Spawns one `NetworkReconciler` per managed network address
//! - Refuses a second reconciler for an address it already manages
//! - Handles graceful shutdown
//!
//! ## Supervision Tree
//!
//! ```text
//! ManagerSupervisor
//! ├── NetworkReconciler(net-a)
//! ├── NetworkReconciler(net-b)
//! └── ...
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::info;
use trellis_id::Address;

use super::framework::{ActorError, Supervisor};
use crate::cluster::ClusterStore;
use crate::config::Config;
use crate::reconciler::{NetworkReconciler, ReconcilerConfig, ReconcilerHandle};

/// Errors from the manager supervisor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SupervisorError {
    /// A reconciler already runs for this network.
    #[error("network '{0}' is already managed")]
    AlreadyManaged(Address),
}

/// Root supervisor for the network manager.
pub struct ManagerSupervisor<S: ClusterStore + 'static> {
    store: Arc<S>,
    reconciler_config: ReconcilerConfig,
    mailbox_size: usize,
    supervisor: Supervisor,
    reconcilers: BTreeMap<Address, ReconcilerHandle>,
}

impl<S: ClusterStore + 'static> ManagerSupervisor<S> {
    /// Create a new manager supervisor.
    pub fn new(config: &Config, store: Arc<S>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            store,
            reconciler_config: config.reconciler_config(),
            mailbox_size: config.mailbox_size,
            supervisor: Supervisor::new(shutdown),
            reconcilers: BTreeMap::new(),
        }
    }

    /// Start reconcilers for every configured network.
    pub fn start(&mut self, networks: &[Address]) -> Result<(), SupervisorError> {
        info!(networks = networks.len(), "Starting manager supervisor");
        for network in networks {
            self.manage(network.clone())?;
        }
        Ok(())
    }

    /// Wait until every reconciler has finished its startup probe.
    pub async fn wait_started(&self) -> Result<(), ActorError> {
        for handle in self.reconcilers.values() {
            handle.inspect().await?;
        }
        Ok(())
    }

    /// Start a reconciler for `network`.
    pub fn manage(&mut self, network: Address) -> Result<ReconcilerHandle, SupervisorError> {
        if self.reconcilers.contains_key(&network) {
            return Err(SupervisorError::AlreadyManaged(network));
        }

        let handle = NetworkReconciler::spawn(
            &mut self.supervisor,
            network.clone(),
            Arc::clone(&self.store),
            self.reconciler_config.clone(),
            self.mailbox_size,
        );
        info!(network = %network, actor_id = %handle.actor_id(), "Managing network");
        self.reconcilers.insert(network, handle.clone());
        Ok(handle)
    }

    /// Get the reconciler for `network`.
    pub fn reconciler(&self, network: &Address) -> Option<&ReconcilerHandle> {
        self.reconcilers.get(network)
    }

    /// Number of reconciler actors still running.
    pub fn running_count(&self) -> usize {
        self.supervisor.running_count()
    }

    /// Stop every reconciler.
    pub async fn shutdown(&mut self) {
        info!(networks = self.reconcilers.len(), "Shutting down manager supervisor");
        self.supervisor.stop_all().await;
        self.reconcilers.clear();
    }
}
