//! Cluster controller implementation
//!
//! This module bridges Cluster API cluster events to the rotation state
//! machine: each event ticks the machine for that cluster, the deletion
//! path tears everything down, and a finalizer keeps the teardown from
//! being skipped.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use semver::Version;
use tracing::{debug, error, info, instrument, warn};

use crate::crd::Cluster;
use crate::error::Error;
use crate::hasher::HasherApp;
use crate::key;
use crate::label;
use crate::rotation::{
    KubeManagementSecrets, KubeWorkloadClusterFactory, ManagementSecrets, RotationService,
    WorkloadClusterFactory,
};
use crate::workload::WorkloadClusterAccess;

/// Operator-wide configuration, one instance per process.
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// App catalog hosting the checksum helper chart.
    pub app_catalog: String,
    /// Container registry domain handed to the helper chart values.
    pub registry_domain: String,
    /// Time between automatic key rotations of a cluster.
    pub key_rotation_period: Duration,
    /// Minimum release-version label for which clusters are reconciled.
    pub from_release_version: String,
}

/// Controller context containing shared state and clients
///
/// The context is shared across all reconciliation calls and holds
/// resources that are expensive to create (like Kubernetes clients).
pub struct Context {
    /// Management-cluster client for cluster-object operations.
    pub client: Client,
    /// Management secret access (trait object for testability).
    pub secrets: Arc<dyn ManagementSecrets>,
    /// Workload cluster handles (trait object for testability).
    pub workload: Arc<dyn WorkloadClusterFactory>,
    /// Operator configuration.
    pub settings: OperatorConfig,
}

impl Context {
    /// Create a context with real Kubernetes-backed implementations.
    pub fn new(client: Client, settings: OperatorConfig) -> Self {
        let access = WorkloadClusterAccess::new(client.clone());
        let hasher = HasherApp::new(&settings.registry_domain, &settings.app_catalog);
        Self {
            secrets: Arc::new(KubeManagementSecrets::new(client.clone())),
            workload: Arc::new(KubeWorkloadClusterFactory::new(access, hasher)),
            client,
            settings,
        }
    }
}

/// Reconcile one Cluster API cluster.
///
/// Clusters carrying a release-version label older than the configured
/// minimum are skipped: their control planes predate support for the
/// encryption provider config and must not receive one.
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = cluster.name_any();
    let namespace = cluster
        .namespace()
        .ok_or_else(|| Error::parse("cluster object carries no namespace"))?;

    match cluster.labels().get(label::RELEASE_VERSION) {
        Some(raw) => {
            if release_too_old(raw, &ctx.settings.from_release_version)? {
                info!(
                    version = %raw,
                    "cluster runs a release without encryption provider support, ignoring"
                );
                return Ok(Action::await_change());
            }
        }
        None => {
            debug!("no release-version label on cluster, assuming Cluster API release");
        }
    }

    let service = RotationService::new(
        &name,
        &namespace,
        ctx.settings.key_rotation_period,
        ctx.secrets.clone(),
        ctx.workload.clone(),
    );

    if cluster.meta().deletion_timestamp.is_some() {
        info!("cluster is being deleted, cleaning up");
        service.delete().await?;
        remove_finalizer(&ctx.client, &cluster, &namespace).await?;
        // Cleanup is done; no reason to see this cluster again.
        return Ok(Action::await_change());
    }

    ensure_finalizer(&ctx.client, &cluster, &namespace).await?;
    service.reconcile().await?;

    Ok(Action::requeue(Duration::from_secs(
        crate::RECONCILE_INTERVAL_SECS,
    )))
}

/// Error policy for the controller
///
/// Called when reconciliation fails; the error was already surfaced by the
/// failing call site, so this only schedules the retry.
pub fn error_policy(cluster: Arc<Cluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        cluster = %cluster.name_any(),
        "reconciliation failed"
    );
    Action::requeue(Duration::from_secs(30))
}

/// Whether `version` predates the configured minimum release.
fn release_too_old(version: &str, minimum: &str) -> Result<bool, Error> {
    let version = Version::parse(version)
        .map_err(|e| Error::invalid_version(format!("cluster label {version:?}: {e}")))?;
    let minimum = Version::parse(minimum)
        .map_err(|e| Error::invalid_version(format!("configured minimum {minimum:?}: {e}")))?;
    Ok(version < minimum)
}

async fn ensure_finalizer(
    client: &Client,
    cluster: &Cluster,
    namespace: &str,
) -> Result<(), Error> {
    if cluster.finalizers().iter().any(|f| f == key::FINALIZER_NAME) {
        return Ok(());
    }

    let mut finalizers = cluster.finalizers().to_vec();
    finalizers.push(key::FINALIZER_NAME.to_string());
    patch_finalizers(client, cluster, namespace, finalizers).await
}

async fn remove_finalizer(
    client: &Client,
    cluster: &Cluster,
    namespace: &str,
) -> Result<(), Error> {
    if !cluster.finalizers().iter().any(|f| f == key::FINALIZER_NAME) {
        return Ok(());
    }

    let finalizers: Vec<String> = cluster
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != key::FINALIZER_NAME)
        .cloned()
        .collect();
    patch_finalizers(client, cluster, namespace, finalizers).await
}

async fn patch_finalizers(
    client: &Client,
    cluster: &Cluster,
    namespace: &str,
    finalizers: Vec<String>,
) -> Result<(), Error> {
    let api: Api<Cluster> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({"metadata": {"finalizers": finalizers}});
    match api
        .patch(
            &cluster.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            // Cluster vanished mid-reconcile; nothing left to pin down.
            warn!(cluster = %cluster.name_any(), "cluster disappeared while updating finalizers");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
