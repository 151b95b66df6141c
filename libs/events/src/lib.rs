//! # trellis-events
//!
//! Watch notifications emitted by the cluster store.
//!
//! ## Delivery
//!
//! - Events are delivered at-least-once; duplicates are normal
//! - Ordering is only guaranteed per key, never across keys
//! - `Delete` events carry the value the key held before deletion
//!
//! Consumers must therefore be idempotent against repeated events for the
//! same key and must not infer cross-key causality from arrival order.

mod envelope;
mod error;
mod types;

pub use envelope::StoreEvent;
pub use error::EventError;
pub use types::EventKind;
