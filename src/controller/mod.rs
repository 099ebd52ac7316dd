//! Controller implementation for Cluster API clusters
//!
//! This module contains the reconciliation logic bridging cluster events to
//! the key-rotation state machine.

mod cluster;

pub use cluster::{error_policy, reconcile, Context, OperatorConfig};
