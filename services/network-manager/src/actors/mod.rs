//! Actor framework for the network manager.
//!
//! A lightweight actor framework: each actor owns the mutable state of one
//! resource and processes its mailbox one message at a time.
//!
//! ## Actor Types
//!
//! - `NetworkReconciler`: reconciles one network address (see `crate::reconciler`)
//! - `ManagerSupervisor`: root supervisor owning one reconciler per network

mod framework;
mod supervisor;

pub use framework::{Actor, ActorContext, ActorError, ActorHandle, ActorRef, ActorState, Message, Supervisor};
pub use supervisor::{ManagerSupervisor, SupervisorError};
