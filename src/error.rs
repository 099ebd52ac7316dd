//! Error types for the encryption-provider operator

use thiserror::Error;

/// Main error type for operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Encryption configuration document could not be decoded
    #[error("parse error: {0}")]
    Parse(String),

    /// Encryption configuration document could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A provider key name does not match the `key<N>` scheme
    #[error("malformed key name: {0:?}")]
    MalformedKeyName(String),

    /// No kubeconfig secret exists for the workload cluster
    #[error("kubeconfig for cluster {0:?} not found")]
    KubeconfigNotFound(String),

    /// A kubeconfig was found but a client could not be built from it
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// Filesystem error on the kubeconfig cache
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A release-version label failed to parse as semver
    #[error("invalid release version: {0}")]
    InvalidVersion(String),
}

impl Error {
    /// Create a parse error with the given message
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a kubeconfig error with the given message
    pub fn kubeconfig(msg: impl Into<String>) -> Self {
        Self::Kubeconfig(msg.into())
    }

    /// Create an invalid-version error with the given message
    pub fn invalid_version(msg: impl Into<String>) -> Self {
        Self::InvalidVersion(msg.into())
    }
}
