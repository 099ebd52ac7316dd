//! encryption-provider-operator - encryption-at-rest lifecycle for workload clusters
//!
//! For every managed workload cluster the operator owns one
//! encryption-provider-config secret in the management cluster. The workload
//! cluster's control-plane bootstrap mounts that secret as the apiserver's
//! `--encryption-provider-config` file. On top of that single document the
//! operator drives a multi-phase key-rotation protocol: introduce a new
//! secretbox key, wait until every control-plane node has adopted the new
//! configuration, rewrite all Secrets in the workload cluster so they are
//! re-encrypted with the new key, and finally retire the previous key.
//!
//! # Modules
//!
//! - [`config`] - Typed model of the apiserver encryption configuration document
//! - [`crd`] - Typed external resources (Cluster API `Cluster`, chart-operator `Chart`)
//! - [`controller`] - Kubernetes controller reconciliation logic
//! - [`rotation`] - The per-cluster key-rotation state machine
//! - [`workload`] - Workload cluster access via kubeconfig secrets
//! - [`hasher`] - Deployment of the in-cluster config checksum helper
//! - [`quorum`] - Control-plane adoption check against published checksums
//! - [`key`] - Key generation and resource naming helpers
//! - [`label`] - Label and annotation vocabulary
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod hasher;
pub mod key;
pub mod label;
pub mod quorum;
pub mod rotation;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Name the operator identifies itself with (managed-by label, field manager).
pub const PROJECT_NAME: &str = "encryption-provider-operator";

/// Requeue interval between reconciliations of a healthy cluster, in seconds.
pub const RECONCILE_INTERVAL_SECS: u64 = 300;
