//! Workload cluster access via kubeconfig secrets.
//!
//! Cluster API writes a kubeconfig for every provisioned cluster into a
//! `<cluster>-kubeconfig` secret next to the Cluster object. The operator
//! materializes that kubeconfig into a per-cluster file under `/tmp` so
//! repeated reconciles do not refetch it from the management apiserver,
//! and builds a [`kube::Client`] from the cached file.

use std::os::unix::fs::PermissionsExt;

use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use crate::error::Error;
use crate::key;

/// Data key in the standard Cluster API kubeconfig secret.
const KUBECONFIG_KEY: &str = "value";

/// Data key in the legacy layout, where the secret lives in a namespace
/// named after the cluster.
const LEGACY_KUBECONFIG_KEY: &str = "kubeConfig";

/// Builds clients for workload clusters from kubeconfig secrets in the
/// management cluster.
#[derive(Clone)]
pub struct WorkloadClusterAccess {
    management: Client,
}

impl WorkloadClusterAccess {
    /// Create an access helper backed by the given management-cluster client.
    pub fn new(management: Client) -> Self {
        Self { management }
    }

    /// Return a client bound to the named workload cluster.
    ///
    /// The kubeconfig is cached at `/tmp/kubeconfig-<cluster>`; an existing
    /// cache file is reused without consulting the management apiserver.
    pub async fn client(
        &self,
        cluster_name: &str,
        cluster_namespace: &str,
    ) -> Result<Client, Error> {
        let path = key::temp_kubeconfig_path(cluster_name);

        if !tokio::fs::try_exists(&path).await? {
            let kubeconfig = self.fetch_kubeconfig(cluster_name, cluster_namespace).await?;
            tokio::fs::write(&path, &kubeconfig).await?;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
            debug!(cluster = %cluster_name, path = %path.display(), "cached workload cluster kubeconfig");
        }

        let kubeconfig = Kubeconfig::read_from(&path)
            .map_err(|e| Error::kubeconfig(format!("reading {}: {e}", path.display())))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::kubeconfig(format!("loading {}: {e}", path.display())))?;

        Ok(Client::try_from(config)?)
    }

    /// Drop the cached kubeconfig for a cluster.
    ///
    /// Must be called on cluster deletion so that a cluster recreated under
    /// the same name cannot be addressed with stale credentials. A missing
    /// cache file is fine.
    pub async fn invalidate(&self, cluster_name: &str) -> Result<(), Error> {
        match tokio::fs::remove_file(key::temp_kubeconfig_path(cluster_name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_kubeconfig(
        &self,
        cluster_name: &str,
        cluster_namespace: &str,
    ) -> Result<Vec<u8>, Error> {
        let secret_name = key::kubeconfig_secret_name(cluster_name);

        let api: Api<Secret> = Api::namespaced(self.management.clone(), cluster_namespace);
        let primary = api.get_opt(&secret_name).await?;

        let legacy = if primary.is_none() {
            let api: Api<Secret> = Api::namespaced(self.management.clone(), cluster_name);
            api.get_opt(&secret_name).await?
        } else {
            None
        };

        extract_kubeconfig(cluster_name, primary, legacy)
    }
}

/// Pick the kubeconfig bytes out of whichever secret layout is present.
fn extract_kubeconfig(
    cluster_name: &str,
    primary: Option<Secret>,
    legacy: Option<Secret>,
) -> Result<Vec<u8>, Error> {
    if let Some(secret) = primary {
        if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(KUBECONFIG_KEY)) {
            return Ok(bytes.0.clone());
        }
    }

    if let Some(secret) = legacy {
        if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(LEGACY_KUBECONFIG_KEY)) {
            return Ok(bytes.0.clone());
        }
    }

    Err(Error::KubeconfigNotFound(cluster_name.to_string()))
}
