//! Prefixed identifiers.

use crate::define_id;

// Unit started by the cluster in response to a deploy call.
define_id!(DeploymentId, "dep");

// A running network-manager process; stamped into its logs.
define_id!(ManagerId, "mgr");
