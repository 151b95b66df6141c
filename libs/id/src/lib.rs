//! # trellis-id
//!
//! Addresses and identifiers shared by every trellis crate.
//!
//! ## Addresses
//!
//! Every resource of a network lives under a hierarchical textual address in
//! the cluster store. Segments are joined with `.`:
//!
//! - `orders` (network)
//! - `orders.parser` (component)
//! - `orders.parser-1` (instance)
//!
//! A resource's *status key* is its address plus the fixed `.__status`
//! suffix. The existence of that key, never its value, signals readiness.
//!
//! ## Deployment IDs
//!
//! Units started by the cluster are identified by a prefixed ULID
//! (`dep_01HV4Z2WQXKJNM8GPQY6VBKC3D`), which keeps them sortable by start time.

mod address;
mod error;
mod macros;
mod types;

pub use address::{Address, STATUS_SUFFIX};
pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
