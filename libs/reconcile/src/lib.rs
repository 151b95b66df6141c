//! Reconciliation primitives.
//!
//! This library provides the building blocks the network reconciler is made
//! of:
//!
//! - [`CountingJoin`]: N-of-N asynchronous fan-in. Every "do K things,
//!   proceed when all finish" point goes through one.
//! - [`ComponentDiff`]: running vs desired component sets.
//! - [`SpecHash`]: stable fingerprint of a descriptor, for drift detection.
//!
//! # Invariants
//!
//! - A join completes exactly once and keeps the first failure it saw
//! - Nothing here retries; callers surface the first cause and move on
//! - Diffs are deterministic given the same inputs

use std::time::Duration;

mod diff;
mod error;
mod hash;
mod join;

pub use diff::ComponentDiff;
pub use error::{ReconcileError, ReconcileResult};
pub use hash::SpecHash;
pub use join::{CountingJoin, JoinAbandoned, JoinCompletion};

/// Default deadline for a single fan-out stage.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(60);
