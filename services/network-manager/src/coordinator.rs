//! Component coordinator - the instance-side counterpart of the reconciler.
//!
//! A coordinator runs next to every deployed instance. It:
//! - Loads the instance descriptor the reconciler wrote
//! - Signals the instance ready by creating its status key
//! - Waits for the whole network to become ready before `start` resolves
//! - Afterwards fires pause/resume callbacks whenever network readiness flips

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use trellis_events::StoreEvent;
use trellis_id::Address;
use trellis_topology::{InstanceDescriptor, TopologyError};

use crate::cluster::{ClusterStore, StoreError, WatchHandler};

/// Errors from the component coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Nothing is stored at the instance address.
    #[error("no descriptor stored for instance '{0}'")]
    MissingDescriptor(Address),

    /// The stored descriptor could not be decoded.
    #[error("invalid instance descriptor: {0}")]
    InvalidDescriptor(#[from] TopologyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("coordinator already started")]
    AlreadyStarted,

    /// The coordinator stopped before the network became ready.
    #[error("coordinator stopped")]
    Stopped,
}

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    pause: Option<Callback>,
    resume: Option<Callback>,
}

/// Coordinates one instance with its network's aggregate readiness.
pub struct ComponentCoordinator<S: ClusterStore + 'static> {
    store: Arc<S>,
    instance: Address,
    network_status: Address,
    callbacks: Arc<Mutex<Callbacks>>,
    watch: Option<WatchHandler>,
    task: Option<JoinHandle<()>>,
}

impl<S: ClusterStore + 'static> ComponentCoordinator<S> {
    pub fn new(store: Arc<S>, instance: Address, network_status: Address) -> Self {
        Self {
            store,
            instance,
            network_status,
            callbacks: Arc::new(Mutex::new(Callbacks::default())),
            watch: None,
            task: None,
        }
    }

    fn callbacks(&self) -> MutexGuard<'_, Callbacks> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the callback fired when the network stops being ready.
    pub fn on_pause<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks().pause = Some(Arc::new(callback));
    }

    /// Register the callback fired when the network becomes ready again.
    pub fn on_resume<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks().resume = Some(Arc::new(callback));
    }

    /// Load the instance descriptor, signal ready, and wait for the network.
    ///
    /// Resolves once the network status key is first seen to exist.
    pub async fn start(&mut self) -> Result<InstanceDescriptor, CoordinatorError> {
        if self.task.is_some() {
            return Err(CoordinatorError::AlreadyStarted);
        }

        let document = self
            .store
            .get(&self.instance)
            .await?
            .ok_or_else(|| CoordinatorError::MissingDescriptor(self.instance.clone()))?;
        let descriptor = InstanceDescriptor::from_json(&document)?;

        // Watch before probing so a flip in between is not missed.
        let (handler, rx) = WatchHandler::channel();
        self.store.watch(&self.network_status, handler.clone()).await?;
        self.watch = Some(handler);

        self.store
            .set(&self.instance.status_address(), "true".to_string())
            .await?;
        let present = self.store.exists(&self.network_status).await?;

        let (started_tx, started_rx) = oneshot::channel();
        self.task = Some(tokio::spawn(watch_network(
            rx,
            present,
            started_tx,
            Arc::clone(&self.callbacks),
            self.instance.clone(),
        )));

        debug!(instance = %self.instance, network_ready = present, "Waiting for network");
        started_rx.await.map_err(|_| CoordinatorError::Stopped)?;

        info!(
            instance = %self.instance,
            component = %descriptor.component,
            "Coordinator started"
        );
        Ok(descriptor)
    }

    /// Signal this instance unready.
    pub async fn pause(&self) -> Result<(), CoordinatorError> {
        self.store.delete(&self.instance.status_address()).await?;
        debug!(instance = %self.instance, "Instance paused");
        Ok(())
    }

    /// Signal this instance ready again.
    pub async fn resume(&self) -> Result<(), CoordinatorError> {
        self.store
            .set(&self.instance.status_address(), "true".to_string())
            .await?;
        debug!(instance = %self.instance, "Instance resumed");
        Ok(())
    }

    /// Stop watching the network and withdraw this instance's readiness.
    pub async fn stop(&mut self) -> Result<(), CoordinatorError> {
        if let Some(handler) = self.watch.take() {
            if let Err(e) = self.store.unwatch(&self.network_status, &handler).await {
                warn!(instance = %self.instance, error = %e, "Failed to remove network watch");
            }
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.store.delete(&self.instance.status_address()).await?;
        info!(instance = %self.instance, "Coordinator stopped");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl<S: ClusterStore + 'static> Drop for ComponentCoordinator<S> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Track network readiness from status key events.
///
/// The first absent-to-present transition releases `start`; afterwards each
/// transition fires the pause or resume callback. Repeated events in the same
/// state fire nothing.
async fn watch_network(
    mut rx: mpsc::UnboundedReceiver<StoreEvent>,
    mut present: bool,
    started: oneshot::Sender<()>,
    callbacks: Arc<Mutex<Callbacks>>,
    instance: Address,
) {
    let mut started = Some(started);
    if present {
        if let Some(tx) = started.take() {
            let _ = tx.send(());
        }
    }

    while let Some(event) = rx.recv().await {
        let exists = event.kind.key_exists();
        if exists == present {
            continue;
        }
        present = exists;

        if let Some(tx) = started.take() {
            let _ = tx.send(());
            continue;
        }

        let callback = {
            let callbacks = callbacks.lock().unwrap_or_else(PoisonError::into_inner);
            if exists {
                callbacks.resume.clone()
            } else {
                callbacks.pause.clone()
            }
        };

        info!(
            instance = %instance,
            "Network {}",
            if exists { "resumed" } else { "paused" }
        );
        if let Some(callback) = callback {
            callback();
        }
    }
}
