//! Core actor framework types and traits.
//!
//! Provides the fundamental building blocks for the actor system:
//! - `Actor` trait for defining actor behavior
//! - `Supervisor` for managing actor lifecycles
//! - `ActorHandle` for sending messages to actors

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

// =============================================================================
// Core Traits
// =============================================================================

/// Marker trait for actor messages.
pub trait Message: Send + Debug + 'static {}

impl<T: Send + Debug + 'static> Message for T {}

/// The Actor trait defines behavior for an actor.
///
/// Actors:
/// - Process messages one at a time (no internal concurrency)
/// - Own mutable state not shared with other actors
/// - Communicate only via message passing
#[async_trait]
pub trait Actor: Send + 'static {
    /// The message type this actor handles.
    type Message: Message;

    /// Actor name for logging.
    fn name(&self) -> &str;

    /// Handle a single message.
    ///
    /// Returns `Ok(true)` to continue, `Ok(false)` to stop, or `Err` on failure.
    async fn handle(&mut self, msg: Self::Message, ctx: &mut ActorContext) -> Result<bool, ActorError>;

    /// Called when the actor starts, before any message is handled.
    async fn on_start(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorError> {
        Ok(())
    }

    /// Called when the actor is about to stop.
    async fn on_stop(&mut self, _ctx: &mut ActorContext) {}
}

/// Context provided to actors during message handling.
pub struct ActorContext {
    /// Actor's unique ID.
    pub actor_id: String,

    /// Shutdown signal receiver.
    pub shutdown: watch::Receiver<bool>,

    /// Message counter.
    pub messages_processed: u64,

    /// Last message processing time.
    pub last_message_at: Option<Instant>,

    /// Current actor state (for introspection).
    pub state: ActorState,
}

impl ActorContext {
    /// Create a new actor context.
    pub fn new(actor_id: String, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            actor_id,
            shutdown,
            messages_processed: 0,
            last_message_at: None,
            state: ActorState::Starting,
        }
    }

    /// Check if shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Actor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in actors.
#[derive(Debug, Error)]
pub enum ActorError {
    /// Error the actor survives; the message is dropped.
    #[error("transient error: {0}")]
    Transient(String),

    /// Error that stops the actor.
    #[error("permanent error: {0}")]
    Permanent(String),

    /// Actor mailbox is full.
    #[error("mailbox full")]
    MailboxFull,

    /// Actor has stopped.
    #[error("actor stopped")]
    ActorStopped,
}

// =============================================================================
// Actor Handle
// =============================================================================

/// Handle for sending messages to an actor.
pub struct ActorHandle<M: Message> {
    /// Sender for the actor's mailbox.
    tx: mpsc::Sender<M>,

    /// Actor ID for logging.
    actor_id: String,
}

impl<M: Message> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            actor_id: self.actor_id.clone(),
        }
    }
}

impl<M: Message> ActorHandle<M> {
    /// Create a handle and the mailbox it feeds.
    pub fn channel(actor_id: impl Into<String>, mailbox_size: usize) -> (Self, mpsc::Receiver<M>) {
        let (tx, rx) = mpsc::channel(mailbox_size);
        let handle = Self {
            tx,
            actor_id: actor_id.into(),
        };
        (handle, rx)
    }

    /// Send a message to the actor.
    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| ActorError::ActorStopped)
    }

    /// Try to send a message without blocking.
    pub fn try_send(&self, msg: M) -> Result<(), ActorError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ActorError::MailboxFull,
            mpsc::error::TrySendError::Closed(_) => ActorError::ActorStopped,
        })
    }

    /// Returns true once the actor's mailbox is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Get the actor ID.
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }
}

impl<M: Message> Debug for ActorHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorHandle")
            .field("actor_id", &self.actor_id)
            .finish()
    }
}

/// Type-erased actor reference for supervision.
pub struct ActorRef {
    /// Actor ID.
    pub actor_id: String,

    /// Actor type name.
    pub actor_type: String,

    /// Task handle.
    task_handle: tokio::task::JoinHandle<()>,

    /// Shutdown sender.
    shutdown_tx: watch::Sender<bool>,
}

impl ActorRef {
    /// Signal the actor to stop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Check if the actor task is still running.
    pub fn is_running(&self) -> bool {
        !self.task_handle.is_finished()
    }

    /// Abort the actor task immediately.
    pub fn abort(&self) {
        self.task_handle.abort();
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Supervisor for managing actor lifecycles.
///
/// Actors are not restarted: a manager that crashes recovers by re-deriving
/// its state from the cluster store on the next start.
pub struct Supervisor {
    /// Supervised actors.
    children: HashMap<String, ActorRef>,

    /// Global shutdown signal. Every child also stops when it fires.
    shutdown: watch::Receiver<bool>,

    /// Grace period before remaining actors are aborted.
    stop_timeout: Duration,
}

impl Supervisor {
    /// Create a new supervisor.
    pub fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            children: HashMap::new(),
            shutdown,
            stop_timeout: Duration::from_secs(10),
        }
    }

    /// Spawn and supervise an actor.
    pub fn spawn<A>(&mut self, actor: A, mailbox_size: usize) -> ActorHandle<A::Message>
    where
        A: Actor,
    {
        let name = actor.name().to_string();
        self.spawn_with(&name, mailbox_size, move |_| actor)
    }

    /// Spawn an actor that needs its own handle, e.g. to bridge external
    /// event sources into its mailbox.
    pub fn spawn_with<A, F>(&mut self, name: &str, mailbox_size: usize, build: F) -> ActorHandle<A::Message>
    where
        A: Actor,
        F: FnOnce(ActorHandle<A::Message>) -> A,
    {
        let actor_id = format!("{}_{}", name, generate_actor_id());
        let (handle, rx) = ActorHandle::channel(actor_id.clone(), mailbox_size);
        let actor = build(handle.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let global = self.shutdown.clone();
        let actor_type = actor.name().to_string();

        let task_handle = tokio::spawn({
            let actor_id = actor_id.clone();
            async move {
                run_actor_loop(actor, rx, shutdown_rx, global, actor_id).await;
            }
        });

        self.children.insert(
            actor_id.clone(),
            ActorRef {
                actor_id: actor_id.clone(),
                actor_type: actor_type.clone(),
                task_handle,
                shutdown_tx,
            },
        );

        info!(actor_id = %actor_id, actor_type = %actor_type, "Spawned actor");

        handle
    }

    /// Stop one supervised actor.
    pub fn stop(&mut self, actor_id: &str) -> bool {
        match self.children.remove(actor_id) {
            Some(child) => {
                child.stop();
                true
            }
            None => false,
        }
    }

    /// Stop all supervised actors.
    pub async fn stop_all(&mut self) {
        info!(count = self.children.len(), "Stopping all actors");

        for child in self.children.values() {
            child.stop();
        }

        // Wait for all to finish with timeout
        let deadline = Instant::now() + self.stop_timeout;
        while Instant::now() < deadline {
            let all_stopped = self.children.values().all(|c| !c.is_running());
            if all_stopped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        // Force abort any remaining
        for (actor_id, child) in &self.children {
            if child.is_running() {
                warn!(actor_id = %actor_id, "Force aborting actor");
                child.abort();
            }
        }

        self.children.clear();
    }

    /// Get count of running actors.
    pub fn running_count(&self) -> usize {
        self.children.values().filter(|c| c.is_running()).count()
    }
}

// =============================================================================
// Actor Loop
// =============================================================================

/// Run the main actor loop.
async fn run_actor_loop<A: Actor>(
    mut actor: A,
    mut rx: mpsc::Receiver<A::Message>,
    mut shutdown: watch::Receiver<bool>,
    mut global: watch::Receiver<bool>,
    actor_id: String,
) {
    let mut ctx = ActorContext::new(actor_id.clone(), shutdown.clone());

    if let Err(e) = actor.on_start(&mut ctx).await {
        error!(actor_id = %actor_id, error = %e, "Actor failed to start");
        ctx.state = ActorState::Failed;
        actor.on_stop(&mut ctx).await;
        return;
    }

    ctx.state = ActorState::Running;
    debug!(actor_id = %actor_id, "Actor started");

    // A dropped sender never signals shutdown.
    let mut own_open = true;
    let mut global_open = true;

    loop {
        tokio::select! {
            biased;

            // Check shutdown first
            changed = shutdown.changed(), if own_open => {
                match changed {
                    Ok(()) if *shutdown.borrow() => {
                        info!(actor_id = %actor_id, "Actor received shutdown signal");
                        break;
                    }
                    Ok(()) => {}
                    Err(_) => own_open = false,
                }
            }

            changed = global.changed(), if global_open => {
                match changed {
                    Ok(()) if *global.borrow() => {
                        info!(actor_id = %actor_id, "Actor received global shutdown signal");
                        break;
                    }
                    Ok(()) => {}
                    Err(_) => global_open = false,
                }
            }

            msg = rx.recv() => {
                match msg {
                    Some(msg) => {
                        ctx.messages_processed += 1;
                        ctx.last_message_at = Some(Instant::now());

                        match actor.handle(msg, &mut ctx).await {
                            Ok(true) => {}
                            Ok(false) => {
                                info!(actor_id = %actor_id, "Actor requested stop");
                                break;
                            }
                            Err(ActorError::Permanent(reason)) => {
                                error!(actor_id = %actor_id, error = %reason, "Actor failed");
                                ctx.state = ActorState::Failed;
                                break;
                            }
                            Err(e) => {
                                warn!(actor_id = %actor_id, error = %e, "Actor error");
                            }
                        }
                    }
                    None => {
                        debug!(actor_id = %actor_id, "Actor mailbox closed");
                        break;
                    }
                }
            }
        }
    }

    if ctx.state != ActorState::Failed {
        ctx.state = ActorState::Stopping;
    }
    actor.on_stop(&mut ctx).await;
    ctx.state = ActorState::Stopped;

    info!(
        actor_id = %actor_id,
        messages_processed = ctx.messages_processed,
        "Actor stopped"
    );
}

// =============================================================================
// Helpers
// =============================================================================

static ACTOR_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_actor_id() -> u64 {
    ACTOR_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[derive(Debug)]
    enum CounterMessage {
        Add(u64),
        Get(oneshot::Sender<u64>),
        Stop,
    }

    struct Counter {
        total: u64,
        own: Option<ActorHandle<CounterMessage>>,
    }

    #[async_trait]
    impl Actor for Counter {
        type Message = CounterMessage;

        fn name(&self) -> &str {
            "counter"
        }

        async fn handle(&mut self, msg: CounterMessage, _ctx: &mut ActorContext) -> Result<bool, ActorError> {
            match msg {
                CounterMessage::Add(n) => self.total += n,
                CounterMessage::Get(reply) => {
                    let _ = reply.send(self.total);
                }
                CounterMessage::Stop => return Ok(false),
            }
            Ok(true)
        }

        async fn on_start(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorError> {
            if let Some(own) = &self.own {
                own.try_send(CounterMessage::Add(100))?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_actor_handle_send() {
        let (handle, mut rx) = ActorHandle::<CounterMessage>::channel("test", 16);

        handle.send(CounterMessage::Add(1)).await.unwrap();

        assert!(matches!(rx.recv().await.unwrap(), CounterMessage::Add(1)));
    }

    #[tokio::test]
    async fn test_spawn_processes_in_order() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut supervisor = Supervisor::new(shutdown_rx);
        let handle = supervisor.spawn(Counter { total: 0, own: None }, 8);

        handle.send(CounterMessage::Add(2)).await.unwrap();
        handle.send(CounterMessage::Add(3)).await.unwrap();
        let (tx, rx) = oneshot::channel();
        handle.send(CounterMessage::Get(tx)).await.unwrap();

        assert_eq!(rx.await.unwrap(), 5);
        assert_eq!(supervisor.running_count(), 1);
    }

    #[tokio::test]
    async fn test_spawn_with_own_handle() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut supervisor = Supervisor::new(shutdown_rx);
        let handle = supervisor.spawn_with("counter", 8, |own| Counter {
            total: 0,
            own: Some(own),
        });

        let (tx, rx) = oneshot::channel();
        handle.send(CounterMessage::Get(tx)).await.unwrap();
        assert_eq!(rx.await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_actor_requested_stop() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut supervisor = Supervisor::new(shutdown_rx);
        let handle = supervisor.spawn(Counter { total: 0, own: None }, 8);

        handle.send(CounterMessage::Stop).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(supervisor.running_count(), 0);
        assert!(handle.send(CounterMessage::Add(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_single_actor() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut supervisor = Supervisor::new(shutdown_rx);
        let stopped = supervisor.spawn(Counter { total: 0, own: None }, 8);
        let kept = supervisor.spawn(Counter { total: 0, own: None }, 8);

        assert!(supervisor.stop(stopped.actor_id()));
        assert!(!supervisor.stop(stopped.actor_id()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(stopped.is_closed());
        assert!(!kept.is_closed());
        assert_eq!(supervisor.running_count(), 1);
    }

    #[tokio::test]
    async fn test_global_shutdown_stops_children() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut supervisor = Supervisor::new(shutdown_rx);
        supervisor.spawn(Counter { total: 0, own: None }, 8);
        supervisor.spawn(Counter { total: 0, own: None }, 8);

        shutdown_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(supervisor.running_count(), 0);

        supervisor.stop_all().await;
    }
}
