//! Key generation and resource naming helpers.

use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::config::Key;
use crate::error::Error;

/// Secretbox (XSalsa20-Poly1305) key size in bytes.
pub const POLY1305_KEY_LENGTH: usize = 32;

/// Finalizer owned by this operator on Cluster objects.
pub const FINALIZER_NAME: &str = "encryption-provider-operator.finalizers.giantswarm.io";

/// Generate `length` cryptographically random bytes, base64-encoded.
pub fn new_random_key(length: usize) -> String {
    let mut raw = vec![0u8; length];
    OsRng.fill_bytes(&mut raw);
    STANDARD.encode(raw)
}

/// Name for the provider key at index `index`.
pub fn key_name(index: u32) -> String {
    format!("key{index}")
}

/// Parse a `key<N>` name back into its index.
pub fn key_index(name: &str) -> Result<u32, Error> {
    name.strip_prefix("key")
        .and_then(|n| n.parse::<u32>().ok())
        .ok_or_else(|| Error::MalformedKeyName(name.to_string()))
}

/// Highest index used within a provider's key list.
pub fn max_key_index(keys: &[Key]) -> Result<u32, Error> {
    let mut max = 0;
    for key in keys {
        max = max.max(key_index(&key.name)?);
    }
    Ok(max)
}

/// Management-cluster secret carrying the encryption provider config.
pub fn secret_name(cluster_name: &str) -> String {
    format!("{cluster_name}-encryption-provider-config")
}

/// Single-key encryption secret left behind by the legacy product.
pub fn legacy_secret_name(cluster_name: &str) -> String {
    format!("{cluster_name}-encryption")
}

/// Secret carrying the workload cluster kubeconfig.
pub fn kubeconfig_secret_name(cluster_name: &str) -> String {
    format!("{cluster_name}-kubeconfig")
}

/// On-disk cache location for a workload cluster kubeconfig.
pub fn temp_kubeconfig_path(cluster_name: &str) -> PathBuf {
    PathBuf::from(format!("/tmp/kubeconfig-{cluster_name}"))
}
