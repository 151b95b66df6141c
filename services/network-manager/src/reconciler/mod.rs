//! Network reconciler - converges the cluster toward a stored topology.
//!
//! One reconciler actor runs per network address. It watches the topology
//! document stored at that address and reacts to its events:
//!
//! - **create**: full deploy (auditors, then components, then persist)
//! - **update**: component-level diff against the last applied snapshot
//! - **delete**: full teardown (components, then auditors)
//!
//! ## State
//!
//! The actor exclusively owns the last applied snapshot (`current`) and the
//! set of ready instances. The status watch registry is shared with fan-out
//! tasks through a lock. Readiness events from instance status watches are
//! delivered through the mailbox, so every mutation is serialized.
//!
//! ## Invariants
//!
//! - `current` is replaced only after a deploy or update pass completes
//! - The ready set is a subset of `current`'s instance addresses
//! - The network status key exists iff every instance of `current` is ready
//! - Startup never issues deploy calls; it re-derives state from the store

mod deploy;
mod readiness;
mod stage;
mod teardown;
mod watches;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};
use trellis_events::{EventKind, StoreEvent};
use trellis_id::Address;
use trellis_reconcile::{ComponentDiff, ReconcileError, ReconcileResult, SpecHash, DEFAULT_STAGE_TIMEOUT};
use trellis_topology::{ComponentDescriptor, InstanceDescriptor, NetworkDescriptor};

use crate::actors::{Actor, ActorContext, ActorError, ActorHandle, Supervisor};
use crate::cluster::{ClusterStore, WatchHandler};

pub use deploy::AUDITOR_UNIT;
pub use readiness::Readiness;
pub use stage::Stage;
pub use teardown::InstanceTeardown;

use deploy::{topology_error, PassContext};
use watches::{forward, WatchRegistry};

/// Number of pass outcomes buffered per subscriber.
const OUTCOME_CAPACITY: usize = 64;

// =============================================================================
// Messages and outcomes
// =============================================================================

/// Messages handled by a network reconciler.
#[derive(Debug)]
pub enum ReconcilerMessage {
    /// Event on the network's topology key.
    Network(StoreEvent),

    /// Event on an instance's status key.
    Status { instance: Address, event: StoreEvent },

    /// Request a snapshot of the reconciler state.
    Inspect {
        reply_to: oneshot::Sender<ReconcilerSnapshot>,
    },
}

/// Kind of reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Startup probe of the persisted topology.
    Start,
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for PassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PassKind::Start => "start",
            PassKind::Create => "create",
            PassKind::Update => "update",
            PassKind::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// Result of one completed reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOutcome {
    pub network: Address,
    pub kind: PassKind,

    /// First recorded cause if the pass failed.
    pub result: ReconcileResult<()>,
}

/// Point-in-time view of a reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerSnapshot {
    pub network: Address,
    pub stage: Stage,
    pub current: Option<NetworkDescriptor>,
    pub ready: BTreeSet<Address>,
    pub watched: BTreeSet<Address>,
}

// =============================================================================
// Configuration
// =============================================================================

/// Reconciler settings.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Cluster name embedded in generated unit configuration.
    pub cluster: String,

    /// Deadline for every fan-out stage.
    pub stage_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            cluster: "trellis".to_string(),
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to a running network reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerHandle {
    network: Address,
    mailbox: ActorHandle<ReconcilerMessage>,
    outcomes: broadcast::Sender<PassOutcome>,
}

impl ReconcilerHandle {
    pub fn network(&self) -> &Address {
        &self.network
    }

    pub fn actor_id(&self) -> &str {
        self.mailbox.actor_id()
    }

    /// Receive the outcome of every pass completed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PassOutcome> {
        self.outcomes.subscribe()
    }

    /// Snapshot the reconciler state between two messages.
    pub async fn inspect(&self) -> Result<ReconcilerSnapshot, ActorError> {
        let (reply_to, rx) = oneshot::channel();
        self.mailbox
            .send(ReconcilerMessage::Inspect { reply_to })
            .await?;
        rx.await.map_err(|_| ActorError::ActorStopped)
    }
}

// =============================================================================
// Network Reconciler
// =============================================================================

/// Reconciler for a single network address.
pub struct NetworkReconciler<S: ClusterStore + 'static> {
    network: Address,
    store: Arc<S>,
    config: ReconcilerConfig,
    mailbox: ActorHandle<ReconcilerMessage>,
    outcomes: broadcast::Sender<PassOutcome>,

    network_watch: Option<WatchHandler>,
    stage: Stage,

    /// Last successfully applied snapshot.
    current: Option<NetworkDescriptor>,
    readiness: Readiness,
    watches: WatchRegistry,
}

impl<S: ClusterStore + 'static> NetworkReconciler<S> {
    /// Spawn a reconciler for `network` under `supervisor`.
    pub fn spawn(
        supervisor: &mut Supervisor,
        network: Address,
        store: Arc<S>,
        config: ReconcilerConfig,
        mailbox_size: usize,
    ) -> ReconcilerHandle {
        let (outcomes, _) = broadcast::channel(OUTCOME_CAPACITY);
        let mailbox = supervisor.spawn_with("network_reconciler", mailbox_size, {
            let network = network.clone();
            let outcomes = outcomes.clone();
            move |mailbox| Self {
                network,
                store,
                config,
                mailbox,
                outcomes,
                network_watch: None,
                stage: Stage::Idle,
                current: None,
                readiness: Readiness::default(),
                watches: WatchRegistry::default(),
            }
        });

        ReconcilerHandle {
            network,
            mailbox,
            outcomes,
        }
    }

    fn pass_context(&self, network: &NetworkDescriptor) -> PassContext<S> {
        PassContext {
            store: Arc::clone(&self.store),
            network: Arc::new(network.clone()),
            watches: self.watches.clone(),
            mailbox: self.mailbox.clone(),
            cluster: Arc::from(self.config.cluster.as_str()),
            deadline: self.config.stage_timeout,
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(network = %self.network, stage = %stage, "Entering stage");
        self.stage = stage;
    }

    fn publish(&self, kind: PassKind, result: ReconcileResult<()>) {
        match &result {
            Ok(()) => info!(network = %self.network, pass = %kind, "Reconciliation pass complete"),
            Err(e) => error!(network = %self.network, pass = %kind, error = %e, "Reconciliation pass failed"),
        }

        // No subscribers is fine.
        let _ = self.outcomes.send(PassOutcome {
            network: self.network.clone(),
            kind,
            result,
        });
    }

    fn snapshot(&self) -> ReconcilerSnapshot {
        ReconcilerSnapshot {
            network: self.network.clone(),
            stage: self.stage,
            current: self.current.clone(),
            ready: self.readiness.ready().clone(),
            watched: self.watches.addresses(),
        }
    }

    fn decode(&self, document: &str) -> ReconcileResult<NetworkDescriptor> {
        let network = NetworkDescriptor::from_json(document).map_err(topology_error)?;
        if network.address != self.network {
            return Err(ReconcileError::Topology(format!(
                "document describes '{}' but is stored at '{}'",
                network.address, self.network
            )));
        }
        Ok(network)
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Re-derive state from a topology persisted by a previous run.
    ///
    /// No deploy call is issued: units are assumed to still be running.
    async fn recover(&mut self) -> ReconcileResult<()> {
        let Some(document) = self.store.get(&self.network).await? else {
            info!(network = %self.network, "No persisted topology, waiting for create");
            return Ok(());
        };

        let network = self.decode(&document)?;
        info!(
            network = %self.network,
            components = network.components.len(),
            instances = network.instance_count(),
            "Recovering persisted topology"
        );
        self.current = Some(network);
        self.refresh_readiness().await;
        self.enter(Stage::Done);
        Ok(())
    }

    // =========================================================================
    // Passes
    // =========================================================================

    /// Full deploy: auditors, then components, then persist.
    ///
    /// A failed stage aborts the pass; units already started keep running.
    async fn deploy(&mut self, desired: NetworkDescriptor) -> ReconcileResult<()> {
        info!(
            network = %self.network,
            auditors = desired.auditors.len(),
            components = desired.components.len(),
            "Deploying network"
        );
        let ctx = self.pass_context(&desired);

        self.enter(Stage::DeployingAuditors);
        ctx.deploy_auditors().await?;

        self.enter(Stage::DeployingComponents);
        ctx.deploy_components(desired.components.values().cloned().collect())
            .await?;

        self.enter(Stage::Persisting);
        let document = desired.to_json().map_err(topology_error)?;
        self.store.set(&self.network, document).await?;

        self.current = Some(desired);
        self.refresh_readiness().await;
        self.enter(Stage::Done);
        Ok(())
    }

    /// Component-level update of a running network.
    ///
    /// Retained components are never redeployed, even if their descriptor
    /// changed; only their instance descriptors are rewritten.
    async fn update(&mut self, running: NetworkDescriptor, desired: NetworkDescriptor) -> ReconcileResult<()> {
        let diff = ComponentDiff::between(&running.component_names(), &desired.component_names());
        info!(
            network = %self.network,
            removed = diff.removed.len(),
            added = diff.added.len(),
            retained = diff.retained.len(),
            "Updating network"
        );
        self.warn_drift(&running, &desired, &diff.retained);

        let removed = select(&running, &diff.removed);
        let added = select(&desired, &diff.added);
        let retained = select(&desired, &diff.retained);

        self.enter(Stage::UndeployingComponents);
        if let Err(e) = self.pass_context(&running).undeploy_components(removed).await {
            warn!(network = %self.network, error = %e, "Failed to undeploy removed components");
        }

        let ctx = self.pass_context(&desired);
        self.enter(Stage::DeployingComponents);
        ctx.deploy_components(added).await?;

        self.enter(Stage::RewritingDescriptors);
        if let Err(e) = ctx.rewrite_descriptors(retained).await {
            warn!(network = %self.network, error = %e, "Failed to rewrite instance descriptors");
        }

        self.current = Some(desired);
        self.refresh_readiness().await;
        self.enter(Stage::Done);
        Ok(())
    }

    /// Full teardown: components, then auditors. Tracked state is cleared
    /// whether or not the teardown succeeded.
    async fn teardown(&mut self, event: &StoreEvent) -> ReconcileResult<()> {
        let target = match event.value() {
            Ok(document) => match self.decode(document) {
                Ok(network) => Some(network),
                Err(e) => {
                    warn!(network = %self.network, error = %e, "Deleted document unusable, using applied snapshot");
                    self.current.clone()
                }
            },
            Err(_) => self.current.clone(),
        };

        let result = match target {
            Some(network) => {
                info!(
                    network = %self.network,
                    components = network.components.len(),
                    auditors = network.auditors.len(),
                    "Tearing down network"
                );
                self.undeploy(&network).await
            }
            None => {
                debug!(network = %self.network, "Nothing to tear down");
                Ok(())
            }
        };

        self.clear().await;
        result
    }

    async fn undeploy(&mut self, network: &NetworkDescriptor) -> ReconcileResult<()> {
        let ctx = self.pass_context(network);

        self.enter(Stage::UndeployingComponents);
        ctx.undeploy_components(network.components.values().cloned().collect())
            .await?;

        self.enter(Stage::UndeployingAuditors);
        ctx.undeploy_auditors().await?;

        self.enter(Stage::Done);
        Ok(())
    }

    fn warn_drift(&self, running: &NetworkDescriptor, desired: &NetworkDescriptor, retained: &BTreeSet<String>) {
        for name in retained {
            let (Some(before), Some(after)) = (running.component(name), desired.component(name)) else {
                continue;
            };
            match (SpecHash::of(before), SpecHash::of(after)) {
                (Ok(before), Ok(after)) if before != after => warn!(
                    network = %self.network,
                    component = %name,
                    running = %before,
                    desired = %after,
                    "Component changed in place, structural changes are not applied"
                ),
                (Err(e), _) | (_, Err(e)) => {
                    debug!(component = %name, error = %e, "Failed to fingerprint component")
                }
                _ => {}
            }
        }
    }

    // =========================================================================
    // Readiness
    // =========================================================================

    /// Bring readiness in line with a freshly replaced `current`.
    ///
    /// Drops stale addresses, watches and probes every instance not yet known
    /// to be ready, then publishes or clears the network status key.
    async fn refresh_readiness(&mut self) {
        let Some(current) = self.current.as_ref() else {
            return;
        };
        let expected = current.instance_addresses();
        self.readiness.retain(&expected);

        let pending: Vec<InstanceDescriptor> = current
            .instances()
            .filter(|instance| !self.readiness.contains(&instance.address))
            .cloned()
            .collect();

        for instance in &pending {
            if let Err(e) = self
                .watches
                .ensure(self.store.as_ref(), instance, &self.mailbox)
                .await
            {
                warn!(instance = %instance.address, error = %e, "Failed to watch instance status");
            }

            match self.store.exists(&instance.status_address).await {
                Ok(true) => {
                    self.readiness.mark_ready(&instance.address, &expected);
                }
                Ok(false) => {}
                Err(e) => warn!(instance = %instance.address, error = %e, "Failed to probe instance status"),
            }
        }

        debug!(
            network = %self.network,
            ready = self.readiness.ready().len(),
            expected = expected.len(),
            "Readiness refreshed"
        );
        self.publish_status(&expected).await;
    }

    async fn on_status(&mut self, instance: Address, event: StoreEvent) {
        let Some(current) = self.current.as_ref() else {
            debug!(instance = %instance, "Ignoring status event without applied topology");
            return;
        };
        let expected = current.instance_addresses();

        let changed = if event.kind.key_exists() {
            self.readiness.mark_ready(&instance, &expected)
        } else {
            self.readiness.mark_unready(&instance)
        };
        if !changed {
            return;
        }

        info!(
            network = %self.network,
            instance = %instance,
            ready = self.readiness.ready().len(),
            expected = expected.len(),
            "Instance {}",
            if event.kind.key_exists() { "ready" } else { "unready" }
        );
        self.publish_status(&expected).await;
    }

    /// Set the network status key if every instance is ready, delete it
    /// otherwise.
    async fn publish_status(&self, expected: &BTreeSet<Address>) {
        let status = self.network.status_address();
        let result = if self.readiness.is_complete(expected) {
            info!(network = %self.network, "Network ready");
            self.store.set(&status, "true".to_string()).await
        } else {
            self.store.delete(&status).await
        };

        if let Err(e) = result {
            warn!(network = %self.network, error = %e, "Failed to update network status");
        }
    }

    /// Forget the applied snapshot and every status watch.
    async fn clear(&mut self) {
        self.current = None;
        self.readiness.clear();
        self.release_watches().await;

        if let Err(e) = self.store.delete(&self.network.status_address()).await {
            warn!(network = %self.network, error = %e, "Failed to clear network status");
        }
    }

    async fn release_watches(&mut self) {
        for (instance, handler) in self.watches.drain() {
            if let Err(e) = self.store.unwatch(&instance.status_address(), &handler).await {
                warn!(instance = %instance, error = %e, "Failed to remove status watch");
            }
        }
    }
}

/// Clone the named components out of `network`.
fn select(network: &NetworkDescriptor, names: &BTreeSet<String>) -> Vec<ComponentDescriptor> {
    names
        .iter()
        .filter_map(|name| network.component(name).cloned())
        .collect()
}

#[async_trait]
impl<S: ClusterStore + 'static> Actor for NetworkReconciler<S> {
    type Message = ReconcilerMessage;

    fn name(&self) -> &str {
        "network_reconciler"
    }

    async fn handle(&mut self, msg: ReconcilerMessage, _ctx: &mut ActorContext) -> Result<bool, ActorError> {
        match msg {
            ReconcilerMessage::Network(event) => self.on_network(event).await,
            ReconcilerMessage::Status { instance, event } => self.on_status(instance, event).await,
            ReconcilerMessage::Inspect { reply_to } => {
                let _ = reply_to.send(self.snapshot());
            }
        }
        Ok(true)
    }

    async fn on_start(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorError> {
        info!(network = %self.network, "Starting network reconciler");

        // Watch before reading so nothing written in between is lost.
        let (handler, rx) = WatchHandler::channel();
        if let Err(e) = self.store.watch(&self.network, handler.clone()).await {
            let err = ReconcileError::from(e);
            self.publish(PassKind::Start, Err(err.clone()));
            return Err(ActorError::Permanent(err.to_string()));
        }
        forward(rx, self.mailbox.clone(), ReconcilerMessage::Network);
        self.network_watch = Some(handler);

        let result = self.recover().await;
        self.publish(PassKind::Start, result);
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &mut ActorContext) {
        if let Some(handler) = self.network_watch.take() {
            if let Err(e) = self.store.unwatch(&self.network, &handler).await {
                warn!(network = %self.network, error = %e, "Failed to remove network watch");
            }
        }
        self.release_watches().await;
        info!(network = %self.network, "Network reconciler stopped");
    }
}

impl<S: ClusterStore + 'static> NetworkReconciler<S> {
    async fn on_network(&mut self, event: StoreEvent) {
        debug!(
            network = %self.network,
            kind = %event.kind,
            revision = event.revision,
            "Topology event"
        );

        let kind = match event.kind {
            EventKind::Create => PassKind::Create,
            EventKind::Update => PassKind::Update,
            EventKind::Delete => {
                let result = self.teardown(&event).await;
                self.publish(PassKind::Delete, result);
                return;
            }
        };

        let desired = match event
            .value()
            .map_err(|e| ReconcileError::Topology(e.to_string()))
            .and_then(|document| self.decode(document))
        {
            Ok(desired) => desired,
            Err(e) => {
                self.publish(kind, Err(e));
                return;
            }
        };

        // Duplicate delivery, or the echo of our own persist.
        if self.current.as_ref() == Some(&desired) {
            debug!(network = %self.network, revision = event.revision, "Topology unchanged");
            return;
        }

        self.enter(Stage::Idle);
        let result = match (kind, self.current.clone()) {
            (PassKind::Update, Some(running)) => self.update(running, desired).await,
            _ => self.deploy(desired).await,
        };
        self.publish(kind, result);
    }
}
