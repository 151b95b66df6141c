//! Status watch registry.
//!
//! Maps an instance address to the handler watching that instance's status
//! key. Instance deploys run concurrently, so the registry is the one piece of
//! reconciler state shared with fan-out tasks; it is lock-guarded and a watch
//! is registered at most once per address.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;
use trellis_events::StoreEvent;
use trellis_id::Address;
use trellis_topology::InstanceDescriptor;

use super::ReconcilerMessage;
use crate::actors::ActorHandle;
use crate::cluster::{ClusterStore, StoreError, WatchHandler};

#[derive(Debug, Clone, Default)]
pub(crate) struct WatchRegistry {
    handlers: Arc<Mutex<HashMap<Address, WatchHandler>>>,
}

impl WatchRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<Address, WatchHandler>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Watch `instance`'s status key unless a watch is already registered.
    ///
    /// Returns true if a new watch was installed. Status events are forwarded
    /// to `mailbox` until the watch is removed.
    pub(crate) async fn ensure<S: ClusterStore + ?Sized>(
        &self,
        store: &S,
        instance: &InstanceDescriptor,
        mailbox: &ActorHandle<ReconcilerMessage>,
    ) -> Result<bool, StoreError> {
        let (handler, rx) = WatchHandler::channel();
        {
            let mut handlers = self.lock();
            if handlers.contains_key(&instance.address) {
                return Ok(false);
            }
            handlers.insert(instance.address.clone(), handler.clone());
        }

        if let Err(e) = store.watch(&instance.status_address, handler).await {
            self.lock().remove(&instance.address);
            return Err(e);
        }

        debug!(instance = %instance.address, "Watching instance status");
        let address = instance.address.clone();
        forward(rx, mailbox.clone(), move |event| ReconcilerMessage::Status {
            instance: address.clone(),
            event,
        });
        Ok(true)
    }

    /// Remove and return the handler registered for `instance`.
    pub(crate) fn take(&self, instance: &Address) -> Option<WatchHandler> {
        self.lock().remove(instance)
    }

    /// Remove and return every registered handler.
    pub(crate) fn drain(&self) -> Vec<(Address, WatchHandler)> {
        self.lock().drain().collect()
    }

    pub(crate) fn addresses(&self) -> BTreeSet<Address> {
        self.lock().keys().cloned().collect()
    }
}

/// Bridge a watch channel into an actor mailbox.
///
/// Ends once every sender of the watch is gone or the actor stops.
pub(crate) fn forward<F>(
    mut rx: mpsc::UnboundedReceiver<StoreEvent>,
    mailbox: ActorHandle<ReconcilerMessage>,
    wrap: F,
) where
    F: Fn(StoreEvent) -> ReconcilerMessage + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if mailbox.send(wrap(event)).await.is_err() {
                break;
            }
        }
    });
}
