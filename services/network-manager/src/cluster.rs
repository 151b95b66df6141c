//! Cluster store interface and local implementation.
//!
//! The cluster store abstracts everything the manager needs from the cluster:
//! - A key/value map with per-key watches
//! - Deploy/undeploy primitives for units
//!
//! A local in-memory implementation is provided for development and testing.
//! It records every call it receives and can be told to fail or hang
//! operations for a given address.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use trellis_events::{EventKind, StoreEvent};
use trellis_id::{Address, DeploymentId};
use trellis_reconcile::ReconcileError;
use trellis_topology::UnitKind;

// =============================================================================
// Errors
// =============================================================================

/// Errors returned by cluster store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not complete the operation.
    #[error("store unavailable for '{key}': {reason}")]
    Unavailable { key: String, reason: String },

    /// A unit is already running at the address.
    #[error("'{0}' is already deployed")]
    AlreadyDeployed(String),

    /// No unit is running at the address.
    #[error("'{0}' is not deployed")]
    NotDeployed(String),

    /// The unit failed to start or stop.
    #[error("unit '{address}' failed: {reason}")]
    UnitFailed { address: String, reason: String },
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { .. } => ReconcileError::Store(err.to_string()),
            StoreError::AlreadyDeployed(ref address)
            | StoreError::NotDeployed(ref address)
            | StoreError::UnitFailed { ref address, .. } => {
                ReconcileError::deployment(address, &err)
            }
        }
    }
}

// =============================================================================
// Watch handlers
// =============================================================================

static WATCH_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Receiving end of a key watch.
///
/// The store keeps a clone per watched key; `unwatch` matches by id. Events are
/// delivered at least once and may repeat.
#[derive(Debug, Clone)]
pub struct WatchHandler {
    id: u64,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

impl WatchHandler {
    /// Create a handler and the receiver its events arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = WATCH_ID_COUNTER.fetch_add(1, Ordering::SeqCst);
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Deliver an event. Returns false if the receiver is gone.
    pub fn notify(&self, event: StoreEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// =============================================================================
// Cluster store
// =============================================================================

/// Request to start one unit on the cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployRequest {
    pub kind: UnitKind,

    /// Address the unit is deployed at.
    pub address: Address,

    /// Deployment group (HA group) the unit is placed in.
    pub group: Option<String>,

    /// Entry point or module identifier.
    pub unit: String,

    /// Generated unit configuration.
    pub config: serde_json::Value,

    /// Number of unit copies to start.
    pub instances: u32,

    pub multithreaded: bool,
}

/// Cluster store interface.
///
/// Every operation completes exactly once. No ordering is guaranteed across
/// keys.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Read a key.
    async fn get(&self, key: &Address) -> Result<Option<String>, StoreError>;

    /// Write a key. Watchers see `Create` if it was absent, `Update` otherwise.
    async fn set(&self, key: &Address, value: String) -> Result<(), StoreError>;

    /// Remove a key. Removing an absent key succeeds without an event.
    async fn delete(&self, key: &Address) -> Result<(), StoreError>;

    /// Check whether a key exists.
    async fn exists(&self, key: &Address) -> Result<bool, StoreError>;

    /// Start delivering events for `key` to `handler`.
    async fn watch(&self, key: &Address, handler: WatchHandler) -> Result<(), StoreError>;

    /// Stop delivering events for `key` to `handler`.
    async fn unwatch(&self, key: &Address, handler: &WatchHandler) -> Result<(), StoreError>;

    /// Check whether a unit is deployed at `address`.
    async fn is_deployed(&self, address: &Address) -> Result<bool, StoreError>;

    /// Start a unit.
    async fn deploy_unit(&self, request: DeployRequest) -> Result<DeploymentId, StoreError>;

    /// Stop the unit deployed at `address`.
    async fn undeploy_unit(&self, kind: UnitKind, address: &Address) -> Result<(), StoreError>;
}

// =============================================================================
// Local cluster
// =============================================================================

/// A unit running on the local cluster.
#[derive(Debug, Clone)]
pub struct LocalDeployment {
    pub id: DeploymentId,
    pub request: DeployRequest,
}

/// In-memory cluster for development and testing.
#[derive(Default)]
pub struct LocalCluster {
    revision: AtomicU64,
    state: Mutex<LocalState>,
}

#[derive(Default)]
struct LocalState {
    data: BTreeMap<Address, String>,
    watchers: HashMap<Address, Vec<WatchHandler>>,
    deployments: BTreeMap<Address, LocalDeployment>,

    deploy_calls: Vec<DeployRequest>,
    undeploy_calls: Vec<(UnitKind, Address)>,
    set_calls: Vec<Address>,

    failing_deploys: HashSet<Address>,
    hanging_deploys: HashSet<Address>,
    failing_undeploys: HashSet<Address>,
    failing_sets: HashSet<Address>,
    failing_deletes: HashSet<Address>,
    failing_unwatches: HashSet<Address>,
}

impl LocalCluster {
    /// Create an empty local cluster.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Notify every live watcher of `key`, dropping closed ones.
    fn publish(&self, state: &mut LocalState, key: &Address, kind: EventKind, value: Option<String>) {
        let Some(handlers) = state.watchers.get_mut(key) else {
            return;
        };
        let event = StoreEvent::new(self.next_revision(), key.clone(), kind, value);
        handlers.retain(|handler| handler.notify(event.clone()));
        if handlers.is_empty() {
            state.watchers.remove(key);
        }
    }

    // -------------------------------------------------------------------------
    // Fault injection
    // -------------------------------------------------------------------------

    /// Make every deploy of `address` fail.
    pub fn fail_deploy(&self, address: &Address) {
        self.lock().failing_deploys.insert(address.clone());
    }

    /// Make every deploy of `address` never complete.
    pub fn hang_deploy(&self, address: &Address) {
        self.lock().hanging_deploys.insert(address.clone());
    }

    /// Make every undeploy of `address` fail.
    pub fn fail_undeploy(&self, address: &Address) {
        self.lock().failing_undeploys.insert(address.clone());
    }

    /// Make every write to `key` fail.
    pub fn fail_set(&self, key: &Address) {
        self.lock().failing_sets.insert(key.clone());
    }

    /// Make every delete of `key` fail.
    pub fn fail_delete(&self, key: &Address) {
        self.lock().failing_deletes.insert(key.clone());
    }

    /// Make every unwatch of `key` fail.
    pub fn fail_unwatch(&self, key: &Address) {
        self.lock().failing_unwatches.insert(key.clone());
    }

    /// Remove all injected faults.
    pub fn heal(&self) {
        let mut state = self.lock();
        state.failing_deploys.clear();
        state.hanging_deploys.clear();
        state.failing_undeploys.clear();
        state.failing_sets.clear();
        state.failing_deletes.clear();
        state.failing_unwatches.clear();
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Every deploy request received, in order, including failed ones.
    pub fn deploy_calls(&self) -> Vec<DeployRequest> {
        self.lock().deploy_calls.clone()
    }

    /// Every undeploy request received, in order.
    pub fn undeploy_calls(&self) -> Vec<(UnitKind, Address)> {
        self.lock().undeploy_calls.clone()
    }

    /// Every key written, in order.
    pub fn set_calls(&self) -> Vec<Address> {
        self.lock().set_calls.clone()
    }

    /// Addresses with a running unit.
    pub fn deployed_addresses(&self) -> BTreeSet<Address> {
        self.lock().deployments.keys().cloned().collect()
    }

    /// The unit running at `address`, if any.
    pub fn deployment(&self, address: &Address) -> Option<LocalDeployment> {
        self.lock().deployments.get(address).cloned()
    }

    /// All keys currently stored.
    pub fn keys(&self) -> BTreeSet<Address> {
        self.lock().data.keys().cloned().collect()
    }

    /// Number of live watchers on `key`.
    pub fn watcher_count(&self, key: &Address) -> usize {
        self.lock()
            .watchers
            .get(key)
            .map_or(0, |handlers| handlers.iter().filter(|h| !h.is_closed()).count())
    }

    /// Register a running unit without recording a deploy call.
    ///
    /// Stands in for units left running by a previous manager process.
    pub fn adopt(&self, request: DeployRequest) -> DeploymentId {
        let id = DeploymentId::new();
        self.lock().deployments.insert(
            request.address.clone(),
            LocalDeployment { id, request },
        );
        id
    }
}

#[async_trait]
impl ClusterStore for LocalCluster {
    async fn get(&self, key: &Address) -> Result<Option<String>, StoreError> {
        Ok(self.lock().data.get(key).cloned())
    }

    async fn set(&self, key: &Address, value: String) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.set_calls.push(key.clone());
        if state.failing_sets.contains(key) {
            return Err(StoreError::Unavailable {
                key: key.to_string(),
                reason: "injected write failure".to_string(),
            });
        }

        let previous = state.data.insert(key.clone(), value.clone());
        let kind = if previous.is_some() {
            EventKind::Update
        } else {
            EventKind::Create
        };
        self.publish(&mut state, key, kind, Some(value));
        Ok(())
    }

    async fn delete(&self, key: &Address) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.failing_deletes.contains(key) {
            return Err(StoreError::Unavailable {
                key: key.to_string(),
                reason: "injected delete failure".to_string(),
            });
        }

        if let Some(previous) = state.data.remove(key) {
            self.publish(&mut state, key, EventKind::Delete, Some(previous));
        }
        Ok(())
    }

    async fn exists(&self, key: &Address) -> Result<bool, StoreError> {
        Ok(self.lock().data.contains_key(key))
    }

    async fn watch(&self, key: &Address, handler: WatchHandler) -> Result<(), StoreError> {
        debug!(key = %key, watch_id = handler.id(), "Registering watch");
        self.lock()
            .watchers
            .entry(key.clone())
            .or_default()
            .push(handler);
        Ok(())
    }

    async fn unwatch(&self, key: &Address, handler: &WatchHandler) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.failing_unwatches.contains(key) {
            return Err(StoreError::Unavailable {
                key: key.to_string(),
                reason: "injected unwatch failure".to_string(),
            });
        }

        if let Some(handlers) = state.watchers.get_mut(key) {
            handlers.retain(|h| h.id() != handler.id());
            if handlers.is_empty() {
                state.watchers.remove(key);
            }
        }
        debug!(key = %key, watch_id = handler.id(), "Removed watch");
        Ok(())
    }

    async fn is_deployed(&self, address: &Address) -> Result<bool, StoreError> {
        Ok(self.lock().deployments.contains_key(address))
    }

    async fn deploy_unit(&self, request: DeployRequest) -> Result<DeploymentId, StoreError> {
        let hang = {
            let mut state = self.lock();
            state.deploy_calls.push(request.clone());

            if state.failing_deploys.contains(&request.address) {
                return Err(StoreError::UnitFailed {
                    address: request.address.to_string(),
                    reason: "injected deploy failure".to_string(),
                });
            }
            if state.deployments.contains_key(&request.address) {
                return Err(StoreError::AlreadyDeployed(request.address.to_string()));
            }
            state.hanging_deploys.contains(&request.address)
        };

        if hang {
            debug!(address = %request.address, "[LOCAL] Deploy hanging");
            std::future::pending::<()>().await;
        }

        let id = DeploymentId::new();
        info!(
            address = %request.address,
            kind = %request.kind,
            unit = %request.unit,
            deployment_id = %id,
            "[LOCAL] Deployed unit"
        );
        self.lock().deployments.insert(
            request.address.clone(),
            LocalDeployment { id, request },
        );
        Ok(id)
    }

    async fn undeploy_unit(&self, kind: UnitKind, address: &Address) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.undeploy_calls.push((kind, address.clone()));

        if state.failing_undeploys.contains(address) {
            return Err(StoreError::UnitFailed {
                address: address.to_string(),
                reason: "injected undeploy failure".to_string(),
            });
        }
        if state.deployments.remove(address).is_none() {
            return Err(StoreError::NotDeployed(address.to_string()));
        }

        info!(address = %address, kind = %kind, "[LOCAL] Undeployed unit");
        Ok(())
    }
}
