//! The per-cluster key-rotation state machine.
//!
//! Every reconcile event ticks the machine once. State lives on the
//! management secret (see [`state`]), so a crashed reconcile resumes
//! wherever the last persisted transition left off:
//!
//! ```text
//!   Absent ──create──▶ Steady ──due/forced──▶ AwaitQuorum ──adopted──▶ sweep ──▶ Steady
//! ```
//!
//! Transitions are persisted before their dependent side effects, and all
//! side effects are idempotent, so re-running a tick after a crash
//! converges instead of compounding.

pub mod state;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::ObjectMeta;
use kube::{Client, ResourceExt};
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::config::{transform, EncryptionConfiguration, ENCRYPTION_CONFIG_KEY};
use crate::error::Error;
use crate::hasher::HasherApp;
use crate::workload::WorkloadClusterAccess;
use crate::{key, label, quorum};

use self::state::RotationState;

/// Management-cluster secret operations the state machine needs.
///
/// A trait so tests can drive the machine against mocks while production
/// uses the real apiserver through [`KubeManagementSecrets`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManagementSecrets: Send + Sync {
    /// Fetch a secret; `None` when it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Create a new secret.
    async fn create(&self, secret: &Secret) -> Result<(), Error>;

    /// Replace an existing secret.
    async fn update(&self, secret: &Secret) -> Result<(), Error>;

    /// Delete a secret; a secret that is already gone is fine.
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Operations against one workload cluster during a rotation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadCluster: Send + Sync {
    /// Ensure the checksum helper is running; safe to repeat.
    async fn deploy_hasher(&self) -> Result<(), Error>;

    /// Remove the checksum helper.
    async fn delete_hasher(&self) -> Result<(), Error>;

    /// Whether every control-plane node runs the given configuration.
    async fn control_plane_adopted(&self, config: &[u8]) -> Result<bool, Error>;

    /// Touch every Secret so the apiserver rewrites it with the current
    /// writer key. Returns the number of secrets touched.
    async fn rewrite_all_secrets(&self) -> Result<usize, Error>;
}

/// Produces [`WorkloadCluster`] handles on demand.
///
/// Workload clusters are only contacted while a rotation is underway, so
/// the handle is created lazily rather than held by the service.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadClusterFactory: Send + Sync {
    /// Build a handle bound to the named workload cluster.
    async fn workload_cluster(
        &self,
        cluster_name: &str,
        cluster_namespace: &str,
    ) -> Result<Arc<dyn WorkloadCluster>, Error>;

    /// Drop cached credentials for a deleted cluster.
    async fn invalidate(&self, cluster_name: &str) -> Result<(), Error>;
}

/// Real [`ManagementSecrets`] backed by a management-cluster client.
pub struct KubeManagementSecrets {
    client: Client,
}

impl KubeManagementSecrets {
    /// Wrap the given management-cluster client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ManagementSecrets for KubeManagementSecrets {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create(&self, secret: &Secret) -> Result<(), Error> {
        let namespace = secret
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::parse("secret to create carries no namespace"))?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), secret).await?;
        Ok(())
    }

    async fn update(&self, secret: &Secret) -> Result<(), Error> {
        let namespace = secret
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::parse("secret to update carries no namespace"))?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.replace(&secret.name_any(), &PostParams::default(), secret)
            .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Real [`WorkloadCluster`] bound to one workload cluster client.
pub struct KubeWorkloadCluster {
    client: Client,
    hasher: HasherApp,
}

impl KubeWorkloadCluster {
    /// Wrap a workload-cluster client and the helper deployer.
    pub fn new(client: Client, hasher: HasherApp) -> Self {
        Self { client, hasher }
    }
}

#[async_trait]
impl WorkloadCluster for KubeWorkloadCluster {
    async fn deploy_hasher(&self) -> Result<(), Error> {
        self.hasher.deploy(&self.client).await
    }

    async fn delete_hasher(&self) -> Result<(), Error> {
        self.hasher.delete(&self.client).await
    }

    async fn control_plane_adopted(&self, config: &[u8]) -> Result<bool, Error> {
        quorum::control_plane_adopted(&self.client, config).await
    }

    async fn rewrite_all_secrets(&self) -> Result<usize, Error> {
        let all: Api<Secret> = Api::all(self.client.clone());
        let secrets = all.list(&ListParams::default()).await?;
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let patch = serde_json::json!({
            "metadata": {"annotations": {label::REWRITED_AT: stamp}}
        });

        let mut rewritten = 0usize;
        for secret in secrets {
            let name = secret.name_any();
            let Some(namespace) = secret.namespace() else {
                continue;
            };

            let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
            match api
                .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
            {
                Ok(_) => rewritten += 1,
                // Deleted while we were sweeping; nothing left to rewrite.
                Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(rewritten)
    }
}

/// Real [`WorkloadClusterFactory`] building clients from kubeconfig secrets.
pub struct KubeWorkloadClusterFactory {
    access: WorkloadClusterAccess,
    hasher: HasherApp,
}

impl KubeWorkloadClusterFactory {
    /// Create a factory from the kubeconfig access helper and the helper
    /// chart deployer.
    pub fn new(access: WorkloadClusterAccess, hasher: HasherApp) -> Self {
        Self { access, hasher }
    }
}

#[async_trait]
impl WorkloadClusterFactory for KubeWorkloadClusterFactory {
    async fn workload_cluster(
        &self,
        cluster_name: &str,
        cluster_namespace: &str,
    ) -> Result<Arc<dyn WorkloadCluster>, Error> {
        let client = self.access.client(cluster_name, cluster_namespace).await?;
        Ok(Arc::new(KubeWorkloadCluster::new(client, self.hasher.clone())))
    }

    async fn invalidate(&self, cluster_name: &str) -> Result<(), Error> {
        self.access.invalidate(cluster_name).await
    }
}

/// Drives the rotation protocol for one cluster.
pub struct RotationService {
    cluster_name: String,
    cluster_namespace: String,
    rotation_period: chrono::Duration,
    secrets: Arc<dyn ManagementSecrets>,
    workload: Arc<dyn WorkloadClusterFactory>,
}

impl RotationService {
    /// Create the service for one cluster.
    pub fn new(
        cluster_name: &str,
        cluster_namespace: &str,
        rotation_period: StdDuration,
        secrets: Arc<dyn ManagementSecrets>,
        workload: Arc<dyn WorkloadClusterFactory>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            cluster_namespace: cluster_namespace.to_string(),
            rotation_period: chrono::Duration::seconds(rotation_period.as_secs() as i64),
            secrets,
            workload,
        }
    }

    /// Tick the state machine once.
    pub async fn reconcile(&self) -> Result<(), Error> {
        let name = key::secret_name(&self.cluster_name);
        match self.secrets.get(&self.cluster_namespace, &name).await? {
            None => self.create_initial().await,
            Some(secret) => self.tick(secret).await,
        }
    }

    /// Clean up everything owned for this cluster.
    pub async fn delete(&self) -> Result<(), Error> {
        self.secrets
            .delete(&self.cluster_namespace, &key::secret_name(&self.cluster_name))
            .await?;
        self.workload.invalidate(&self.cluster_name).await?;
        info!(cluster = %self.cluster_name, "encryption provider config cleaned up");
        Ok(())
    }

    /// First reconcile: create the management secret, seeding it from the
    /// legacy encryption secret when one exists so current data stays
    /// readable, and from a fresh random key otherwise.
    async fn create_initial(&self) -> Result<(), Error> {
        let legacy = self
            .secrets
            .get(
                &self.cluster_namespace,
                &key::legacy_secret_name(&self.cluster_name),
            )
            .await?;

        let doc = match legacy {
            Some(legacy_secret) => {
                let raw = legacy_secret
                    .data
                    .as_ref()
                    .and_then(|d| d.get(ENCRYPTION_CONFIG_KEY))
                    .ok_or_else(|| {
                        Error::parse("legacy encryption secret has no encryption key")
                    })?;
                let legacy_key = String::from_utf8(raw.0.clone())
                    .map_err(|_| Error::parse("legacy encryption key is not valid UTF-8"))?;
                info!(
                    cluster = %self.cluster_name,
                    "migrating AES-CBC key from legacy encryption secret"
                );
                EncryptionConfiguration::initial_aescbc(&legacy_key)
            }
            None => {
                info!(
                    cluster = %self.cluster_name,
                    "generating a fresh secretbox encryption key"
                );
                EncryptionConfiguration::initial_secretbox(&key::new_random_key(
                    key::POLY1305_KEY_LENGTH,
                ))
            }
        };

        let secret = self.build_secret(&doc)?;
        self.secrets.create(&secret).await?;
        info!(cluster = %self.cluster_name, "created encryption provider config secret");
        Ok(())
    }

    async fn tick(&self, secret: Secret) -> Result<(), Error> {
        match RotationState::from_secret(&secret)? {
            RotationState::Steady { last_rotation } => {
                if !state::rotation_enabled(&secret) {
                    debug!(cluster = %self.cluster_name, "key rotation not enabled");
                    return Ok(());
                }

                let created = secret.metadata.creation_timestamp.as_ref().map(|t| t.0);
                let forced = state::force_requested(&secret);
                if rotation_due(Utc::now(), created, last_rotation, self.rotation_period, forced) {
                    self.begin_rotation(secret).await
                } else {
                    debug!(cluster = %self.cluster_name, "key rotation not due yet");
                    Ok(())
                }
            }
            RotationState::AwaitQuorum => self.resume_rotation(secret).await,
        }
    }

    /// Steady → AwaitQuorum: introduce the new key, persist, then make sure
    /// the checksum helper runs so adoption can be observed.
    async fn begin_rotation(&self, mut secret: Secret) -> Result<(), Error> {
        let doc = EncryptionConfiguration::parse(&config_bytes(&secret)?)?;

        if transform::secretbox_at_key_limit(&doc) {
            warn!(
                cluster = %self.cluster_name,
                "writer provider already carries the maximum number of keys; an \
                 earlier rotation has not finished, not introducing another key"
            );
            return Ok(());
        }

        let new_key = key::new_random_key(key::POLY1305_KEY_LENGTH);
        let doc = transform::add_key(doc, &new_key)?;

        write_config(&mut secret, &doc)?;
        state::set_annotation(&mut secret, label::ROTATION_IN_PROGRESS, "true");
        state::clear_annotation(&mut secret, label::FORCE_ROTATION);
        self.secrets.update(&secret).await?;
        info!(
            cluster = %self.cluster_name,
            "introduced a new encryption key, waiting for control plane adoption"
        );

        let wc = self
            .workload
            .workload_cluster(&self.cluster_name, &self.cluster_namespace)
            .await?;
        wc.deploy_hasher().await?;
        Ok(())
    }

    /// AwaitQuorum: once every control-plane node runs the new
    /// configuration, rewrite all workload secrets and retire the old key.
    async fn resume_rotation(&self, mut secret: Secret) -> Result<(), Error> {
        let config = config_bytes(&secret)?;
        let wc = self
            .workload
            .workload_cluster(&self.cluster_name, &self.cluster_namespace)
            .await?;

        if !wc.control_plane_adopted(&config).await? {
            // Re-deploying covers both helper loss and a crash between the
            // key introduction and the first deploy.
            wc.deploy_hasher().await?;
            info!(
                cluster = %self.cluster_name,
                "control plane has not fully adopted the new configuration yet"
            );
            return Ok(());
        }

        let rewritten = wc.rewrite_all_secrets().await?;
        info!(
            cluster = %self.cluster_name,
            secrets = rewritten,
            "workload secrets rewritten with the new key"
        );

        wc.delete_hasher().await?;

        let doc = transform::remove_old_key(EncryptionConfiguration::parse(&config)?)?;
        write_config(&mut secret, &doc)?;
        state::clear_annotation(&mut secret, label::ROTATION_IN_PROGRESS);
        state::set_annotation(
            &mut secret,
            label::LAST_ROTATION,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        self.secrets.update(&secret).await?;
        info!(cluster = %self.cluster_name, "key rotation completed");
        Ok(())
    }

    fn build_secret(&self, doc: &EncryptionConfiguration) -> Result<Secret, Error> {
        let yaml = String::from_utf8(doc.serialize()?)
            .map_err(|e| Error::serialization(e.to_string()))?;

        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(key::secret_name(&self.cluster_name)),
                namespace: Some(self.cluster_namespace.clone()),
                labels: Some(BTreeMap::from([
                    (label::CLUSTER.to_string(), self.cluster_name.clone()),
                    (label::MANAGED_BY.to_string(), crate::PROJECT_NAME.to_string()),
                    (
                        label::RANDOM_KEY.to_string(),
                        label::RANDOM_KEY_TYPE_ENCRYPTION.to_string(),
                    ),
                    (label::CLUSTER_NAME.to_string(), self.cluster_name.clone()),
                ])),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            string_data: Some(BTreeMap::from([(ENCRYPTION_CONFIG_KEY.to_string(), yaml)])),
            ..Default::default()
        })
    }
}

/// Whether enough time has passed (or a rotation was forced).
fn rotation_due(
    now: DateTime<Utc>,
    created: Option<DateTime<Utc>>,
    last_rotation: Option<DateTime<Utc>>,
    period: chrono::Duration,
    forced: bool,
) -> bool {
    if forced {
        return true;
    }
    match last_rotation.or(created) {
        Some(reference) => now - reference > period,
        None => false,
    }
}

/// The serialized document carried by the management secret.
fn config_bytes(secret: &Secret) -> Result<Vec<u8>, Error> {
    if let Some(raw) = secret.data.as_ref().and_then(|d| d.get(ENCRYPTION_CONFIG_KEY)) {
        return Ok(raw.0.clone());
    }
    if let Some(raw) = secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(ENCRYPTION_CONFIG_KEY))
    {
        return Ok(raw.clone().into_bytes());
    }
    Err(Error::parse(format!(
        "secret {:?} carries no encryption configuration",
        secret.metadata.name.as_deref().unwrap_or("")
    )))
}

fn write_config(secret: &mut Secret, doc: &EncryptionConfiguration) -> Result<(), Error> {
    let bytes = doc.serialize()?;
    // string_data would shadow data on the server side; only data is kept.
    secret.string_data = None;
    secret
        .data
        .get_or_insert_with(Default::default)
        .insert(ENCRYPTION_CONFIG_KEY.to_string(), ByteString(bytes));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use chrono::TimeZone;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::sync::Mutex;

    const CLUSTER: &str = "abc12";
    const NAMESPACE: &str = "org-test";
    const PERIOD: StdDuration = StdDuration::from_secs(30 * 24 * 60 * 60);

    /// Captures secrets written through the mock without coupling tests to
    /// mock call matchers.
    #[derive(Clone, Default)]
    struct SecretCapture {
        written: Arc<Mutex<Vec<Secret>>>,
    }

    impl SecretCapture {
        fn record(&self, secret: &Secret) {
            self.written.lock().unwrap().push(secret.clone());
        }

        fn last(&self) -> Secret {
            self.written.lock().unwrap().last().cloned().expect("no secret written")
        }

        fn count(&self) -> usize {
            self.written.lock().unwrap().len()
        }
    }

    fn service(
        secrets: MockManagementSecrets,
        workload: MockWorkloadClusterFactory,
    ) -> RotationService {
        RotationService::new(CLUSTER, NAMESPACE, PERIOD, Arc::new(secrets), Arc::new(workload))
    }

    fn single_key_doc() -> EncryptionConfiguration {
        EncryptionConfiguration::initial_secretbox("dGVzdGtleTE=")
    }

    fn two_key_doc() -> EncryptionConfiguration {
        transform::add_key(single_key_doc(), "dGVzdGtleTI=").unwrap()
    }

    fn management_secret(
        doc: &EncryptionConfiguration,
        annotations: &[(&str, &str)],
    ) -> Secret {
        let mut secret = Secret {
            metadata: ObjectMeta {
                name: Some(key::secret_name(CLUSTER)),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                ENCRYPTION_CONFIG_KEY.to_string(),
                ByteString(doc.serialize().unwrap()),
            )])),
            ..Default::default()
        };
        for (k, v) in annotations {
            state::set_annotation(&mut secret, k, *v);
        }
        secret
    }

    fn stored_doc(secret: &Secret) -> EncryptionConfiguration {
        let raw = config_bytes(secret).unwrap();
        EncryptionConfiguration::parse(&raw).unwrap()
    }

    fn expect_no_management_secret(secrets: &mut MockManagementSecrets) {
        secrets
            .expect_get()
            .withf(|_, name| name.ends_with("-encryption-provider-config"))
            .returning(|_, _| Ok(None));
    }

    // ===== first reconcile =====

    /// Fresh cluster: no management secret, no legacy secret. One tick
    /// creates the config with a single secretbox key and never touches the
    /// workload cluster.
    #[tokio::test]
    async fn fresh_cluster_gets_a_secretbox_document() {
        let mut secrets = MockManagementSecrets::new();
        expect_no_management_secret(&mut secrets);
        secrets
            .expect_get()
            .withf(|_, name| name == "abc12-encryption")
            .returning(|_, _| Ok(None));

        let capture = SecretCapture::default();
        let cap = capture.clone();
        secrets.expect_create().times(1).returning(move |s| {
            cap.record(s);
            Ok(())
        });

        // No expectations: any workload-cluster access panics the test.
        let workload = MockWorkloadClusterFactory::new();

        service(secrets, workload).reconcile().await.unwrap();

        let created = capture.last();
        assert_eq!(created.metadata.name.as_deref(), Some("abc12-encryption-provider-config"));
        assert_eq!(created.metadata.namespace.as_deref(), Some(NAMESPACE));

        let labels = created.metadata.labels.clone().unwrap();
        assert_eq!(labels.get(label::CLUSTER).map(String::as_str), Some(CLUSTER));
        assert_eq!(
            labels.get(label::MANAGED_BY).map(String::as_str),
            Some("encryption-provider-operator")
        );
        assert_eq!(labels.get(label::CLUSTER_NAME).map(String::as_str), Some(CLUSTER));

        let doc = stored_doc(&created);
        let providers = doc.providers();
        assert_eq!(providers.len(), 2);
        assert!(providers[0].is_secretbox());
        assert!(providers[1].is_identity());

        let keys = providers[0].keys().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].name, "key1");
        let raw = STANDARD.decode(&keys[0].secret).unwrap();
        assert_eq!(raw.len(), key::POLY1305_KEY_LENGTH);
    }

    /// Legacy migration: the old product's key is carried over as an
    /// aescbc writer so existing data stays readable.
    #[tokio::test]
    async fn legacy_key_is_migrated_as_aescbc() {
        let mut secrets = MockManagementSecrets::new();
        expect_no_management_secret(&mut secrets);
        secrets
            .expect_get()
            .withf(|_, name| name == "abc12-encryption")
            .returning(|_, _| {
                Ok(Some(Secret {
                    data: Some(BTreeMap::from([(
                        "encryption".to_string(),
                        ByteString(b"Zm9vYmFy".to_vec()),
                    )])),
                    ..Default::default()
                }))
            });

        let capture = SecretCapture::default();
        let cap = capture.clone();
        secrets.expect_create().times(1).returning(move |s| {
            cap.record(s);
            Ok(())
        });

        let workload = MockWorkloadClusterFactory::new();
        service(secrets, workload).reconcile().await.unwrap();

        let doc = stored_doc(&capture.last());
        let providers = doc.providers();
        assert_eq!(providers.len(), 2);
        assert!(providers[0].is_aescbc());
        assert!(providers[1].is_identity());

        let keys = providers[0].keys().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].name, "key1");
        assert_eq!(keys[0].secret, "Zm9vYmFy");
    }

    #[tokio::test]
    async fn legacy_secret_without_key_is_fatal() {
        let mut secrets = MockManagementSecrets::new();
        expect_no_management_secret(&mut secrets);
        secrets
            .expect_get()
            .withf(|_, name| name == "abc12-encryption")
            .returning(|_, _| Ok(Some(Secret::default())));

        let workload = MockWorkloadClusterFactory::new();
        let err = service(secrets, workload).reconcile().await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    // ===== steady state =====

    #[tokio::test]
    async fn steady_without_enable_annotation_is_a_noop() {
        let mut secrets = MockManagementSecrets::new();
        let existing = management_secret(&single_key_doc(), &[]);
        secrets
            .expect_get()
            .returning(move |_, _| Ok(Some(existing.clone())));

        let workload = MockWorkloadClusterFactory::new();
        service(secrets, workload).reconcile().await.unwrap();
    }

    #[tokio::test]
    async fn steady_within_the_period_waits() {
        let mut secrets = MockManagementSecrets::new();
        let recent = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut existing = management_secret(
            &single_key_doc(),
            &[(label::ENABLE_ROTATION, "true")],
        );
        state::set_annotation(&mut existing, label::LAST_ROTATION, recent);
        secrets
            .expect_get()
            .returning(move |_, _| Ok(Some(existing.clone())));

        let workload = MockWorkloadClusterFactory::new();
        service(secrets, workload).reconcile().await.unwrap();
    }

    /// Forced rotation: the new key is persisted together with the
    /// in-progress marker before the helper is deployed, and the force
    /// annotation is consumed.
    #[tokio::test]
    async fn forced_rotation_introduces_a_second_key() {
        let mut secrets = MockManagementSecrets::new();
        let existing = management_secret(
            &single_key_doc(),
            &[
                (label::ENABLE_ROTATION, "true"),
                (label::FORCE_ROTATION, "true"),
            ],
        );
        secrets
            .expect_get()
            .returning(move |_, _| Ok(Some(existing.clone())));

        let capture = SecretCapture::default();
        let cap = capture.clone();
        secrets.expect_update().times(1).returning(move |s| {
            cap.record(s);
            Ok(())
        });

        let mut wc = MockWorkloadCluster::new();
        wc.expect_deploy_hasher().times(1).returning(|| Ok(()));
        let wc = Arc::new(wc);
        let mut workload = MockWorkloadClusterFactory::new();
        workload
            .expect_workload_cluster()
            .returning(move |_, _| Ok(wc.clone()));

        service(secrets, workload).reconcile().await.unwrap();

        let updated = capture.last();
        assert!(state::annotation(&updated, label::ROTATION_IN_PROGRESS).is_some());
        assert!(state::annotation(&updated, label::FORCE_ROTATION).is_none());

        let doc = stored_doc(&updated);
        let keys = doc.providers()[0].keys().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].name, "key2");
        assert_eq!(keys[1].name, "key1");
        assert_eq!(keys[1].secret, "dGVzdGtleTE=");
    }

    /// An elapsed period counts from the secret's creation when no rotation
    /// ever completed.
    #[tokio::test]
    async fn elapsed_period_since_creation_triggers_rotation() {
        let mut secrets = MockManagementSecrets::new();
        let mut existing = management_secret(
            &single_key_doc(),
            &[(label::ENABLE_ROTATION, "true")],
        );
        existing.metadata.creation_timestamp =
            Some(Time(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()));
        secrets
            .expect_get()
            .returning(move |_, _| Ok(Some(existing.clone())));

        let capture = SecretCapture::default();
        let cap = capture.clone();
        secrets.expect_update().times(1).returning(move |s| {
            cap.record(s);
            Ok(())
        });

        let mut wc = MockWorkloadCluster::new();
        wc.expect_deploy_hasher().times(1).returning(|| Ok(()));
        let wc = Arc::new(wc);
        let mut workload = MockWorkloadClusterFactory::new();
        workload
            .expect_workload_cluster()
            .returning(move |_, _| Ok(wc.clone()));

        service(secrets, workload).reconcile().await.unwrap();
        assert_eq!(capture.count(), 1);
    }

    /// The writer already carries two keys: an earlier rotation never
    /// finished. The operator is warned and nothing is written.
    #[tokio::test]
    async fn rotation_at_key_limit_changes_nothing() {
        let mut secrets = MockManagementSecrets::new();
        let existing = management_secret(
            &two_key_doc(),
            &[
                (label::ENABLE_ROTATION, "true"),
                (label::FORCE_ROTATION, "true"),
            ],
        );
        secrets
            .expect_get()
            .returning(move |_, _| Ok(Some(existing.clone())));

        let workload = MockWorkloadClusterFactory::new();
        service(secrets, workload).reconcile().await.unwrap();
    }

    // ===== awaiting quorum =====

    #[tokio::test]
    async fn quorum_not_reached_redeploys_the_helper_and_waits() {
        let mut secrets = MockManagementSecrets::new();
        let existing = management_secret(
            &two_key_doc(),
            &[
                (label::ENABLE_ROTATION, "true"),
                (label::ROTATION_IN_PROGRESS, "true"),
            ],
        );
        secrets
            .expect_get()
            .returning(move |_, _| Ok(Some(existing.clone())));

        let mut wc = MockWorkloadCluster::new();
        wc.expect_control_plane_adopted()
            .times(1)
            .returning(|_| Ok(false));
        wc.expect_deploy_hasher().times(1).returning(|| Ok(()));
        let wc = Arc::new(wc);
        let mut workload = MockWorkloadClusterFactory::new();
        workload
            .expect_workload_cluster()
            .returning(move |_, _| Ok(wc.clone()));

        service(secrets, workload).reconcile().await.unwrap();
    }

    /// Restart after a crash between key introduction and the sweep: the
    /// in-progress marker alone resumes the rotation, performs the sweep
    /// and retires the old key without ever minting a third one.
    #[tokio::test]
    async fn quorum_reached_sweeps_and_finishes_the_rotation() {
        let mut secrets = MockManagementSecrets::new();
        let existing = management_secret(
            &two_key_doc(),
            &[
                (label::ENABLE_ROTATION, "true"),
                (label::ROTATION_IN_PROGRESS, "true"),
            ],
        );
        secrets
            .expect_get()
            .returning(move |_, _| Ok(Some(existing.clone())));

        let capture = SecretCapture::default();
        let cap = capture.clone();
        secrets.expect_update().times(1).returning(move |s| {
            cap.record(s);
            Ok(())
        });

        let mut wc = MockWorkloadCluster::new();
        wc.expect_control_plane_adopted()
            .times(1)
            .returning(|_| Ok(true));
        wc.expect_rewrite_all_secrets().times(1).returning(|| Ok(7));
        wc.expect_delete_hasher().times(1).returning(|| Ok(()));
        let wc = Arc::new(wc);
        let mut workload = MockWorkloadClusterFactory::new();
        workload
            .expect_workload_cluster()
            .returning(move |_, _| Ok(wc.clone()));

        service(secrets, workload).reconcile().await.unwrap();

        let updated = capture.last();
        assert!(state::annotation(&updated, label::ROTATION_IN_PROGRESS).is_none());
        let finished = state::annotation(&updated, label::LAST_ROTATION).unwrap();
        assert!(DateTime::parse_from_rfc3339(finished).is_ok());

        let doc = stored_doc(&updated);
        let keys = doc.providers()[0].keys().unwrap();
        assert_eq!(keys.len(), 1, "old key retired, no third key minted");
        assert_eq!(keys[0].name, "key2");
        assert!(doc.providers().last().unwrap().is_identity());
    }

    // ===== deletion =====

    #[tokio::test]
    async fn delete_removes_the_secret_and_cached_credentials() {
        let mut secrets = MockManagementSecrets::new();
        secrets
            .expect_delete()
            .withf(|ns, name| ns == NAMESPACE && name == "abc12-encryption-provider-config")
            .times(1)
            .returning(|_, _| Ok(()));

        let mut workload = MockWorkloadClusterFactory::new();
        workload
            .expect_invalidate()
            .withf(|name| name == CLUSTER)
            .times(1)
            .returning(|_| Ok(()));

        service(secrets, workload).delete().await.unwrap();
    }

    // ===== timing =====

    #[test]
    fn rotation_due_prefers_last_rotation_over_creation() {
        let now = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let period = chrono::Duration::days(30);
        let old = Some(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
        let recent = Some(Utc.with_ymd_and_hms(2023, 5, 20, 0, 0, 0).unwrap());

        // Old creation but recent completed rotation: not due.
        assert!(!rotation_due(now, old, recent, period, false));
        // No rotation yet, old creation: due.
        assert!(rotation_due(now, old, None, period, false));
        // Neither reference known: not due.
        assert!(!rotation_due(now, None, None, period, false));
        // Force wins regardless.
        assert!(rotation_due(now, None, None, period, true));
        assert!(rotation_due(now, old, recent, period, true));
    }
}
