//! Deployment of the in-cluster config checksum helper.
//!
//! The operator cannot see the filesystem of control-plane nodes, so a small
//! helper workload runs inside each workload cluster and publishes the
//! SHAKE-256 digest of the encryption-provider config file per node into a
//! well-known secret (see [`crate::quorum`]). The helper ships as a chart;
//! this module keeps its Chart CR and chart-values ConfigMap in place while
//! a rotation is waiting for control-plane adoption and removes them again
//! afterwards.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams, PostParams};
use kube::core::ObjectMeta;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::crd::{Chart, ChartConfig, ChartConfigMapRef, ChartSpec};
use crate::error::Error;

/// Release name of the checksum helper.
pub const HASHER_APP_NAME: &str = "encryption-config-hasher";

/// Version of the helper chart the operator deploys.
pub const HASHER_APP_VERSION: &str = "0.1.0";

/// ConfigMap carrying the helper chart's values document.
const CHART_VALUES_CONFIGMAP: &str = "encryption-config-hasher-chart-values";

/// Namespace watched by the chart-operator in workload clusters.
const CHART_NAMESPACE: &str = "giantswarm";

/// Namespace the helper's workload is deployed into.
const DEPLOY_NAMESPACE: &str = "kube-system";

/// Host serving packaged app-catalog charts.
const CATALOG_HOST: &str = "giantswarm.github.io";

const CHART_OPERATOR_VERSION_LABEL: &str = "chart-operator.giantswarm.io/version";
const CHART_OPERATOR_VERSION: &str = "1.0.0";
const FORCE_HELM_UPGRADE_ANNOTATION: &str = "chart-operator.giantswarm.io/force-helm-upgrade";
const APP_NAME_LABEL: &str = "app.kubernetes.io/name";

/// Manages the checksum helper objects in a workload cluster.
#[derive(Clone, Debug)]
pub struct HasherApp {
    registry_domain: String,
    app_catalog: String,
}

impl HasherApp {
    /// Create a deployer for the given registry domain and app catalog.
    pub fn new(registry_domain: &str, app_catalog: &str) -> Self {
        Self {
            registry_domain: registry_domain.to_string(),
            app_catalog: app_catalog.to_string(),
        }
    }

    /// Ensure both helper objects exist in the workload cluster.
    ///
    /// Safe to call on every reconcile; an existing object is updated to
    /// the desired spec.
    pub async fn deploy(&self, wc_client: &Client) -> Result<(), Error> {
        let config_maps: Api<ConfigMap> = Api::namespaced(wc_client.clone(), CHART_NAMESPACE);
        upsert(&config_maps, self.desired_config_map()).await?;

        let charts: Api<Chart> = Api::namespaced(wc_client.clone(), CHART_NAMESPACE);
        upsert(&charts, self.desired_chart()).await?;

        info!(chart = HASHER_APP_NAME, "checksum helper deployed");
        Ok(())
    }

    /// Remove both helper objects from the workload cluster.
    ///
    /// Objects that are already gone are fine.
    pub async fn delete(&self, wc_client: &Client) -> Result<(), Error> {
        let charts: Api<Chart> = Api::namespaced(wc_client.clone(), CHART_NAMESPACE);
        delete_ignoring_absent(&charts, HASHER_APP_NAME).await?;

        let config_maps: Api<ConfigMap> = Api::namespaced(wc_client.clone(), CHART_NAMESPACE);
        delete_ignoring_absent(&config_maps, CHART_VALUES_CONFIGMAP).await?;

        info!(chart = HASHER_APP_NAME, "checksum helper removed");
        Ok(())
    }

    fn desired_config_map(&self) -> ConfigMap {
        let values = format!("registry:\n  domain: {}\n", self.registry_domain);

        ConfigMap {
            metadata: ObjectMeta {
                name: Some(CHART_VALUES_CONFIGMAP.to_string()),
                namespace: Some(CHART_NAMESPACE.to_string()),
                labels: Some(BTreeMap::from([(
                    APP_NAME_LABEL.to_string(),
                    HASHER_APP_NAME.to_string(),
                )])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("values".to_string(), values)])),
            ..Default::default()
        }
    }

    fn desired_chart(&self) -> Chart {
        let mut chart = Chart::new(
            HASHER_APP_NAME,
            ChartSpec {
                name: HASHER_APP_NAME.to_string(),
                namespace: DEPLOY_NAMESPACE.to_string(),
                tarball_url: self.tarball_url(),
                version: HASHER_APP_VERSION.to_string(),
                config: Some(ChartConfig {
                    config_map: Some(ChartConfigMapRef {
                        name: CHART_VALUES_CONFIGMAP.to_string(),
                        namespace: CHART_NAMESPACE.to_string(),
                    }),
                }),
            },
        );
        chart.metadata.namespace = Some(CHART_NAMESPACE.to_string());
        chart.metadata.labels = Some(BTreeMap::from([(
            CHART_OPERATOR_VERSION_LABEL.to_string(),
            CHART_OPERATOR_VERSION.to_string(),
        )]));
        chart.metadata.annotations = Some(BTreeMap::from([(
            FORCE_HELM_UPGRADE_ANNOTATION.to_string(),
            "true".to_string(),
        )]));
        chart
    }

    fn tarball_url(&self) -> String {
        format!(
            "https://{CATALOG_HOST}/{}/{HASHER_APP_NAME}-{HASHER_APP_VERSION}.tgz",
            self.app_catalog
        )
    }
}

/// Create the object, or update it in place if it already exists.
async fn upsert<K>(api: &Api<K>, mut desired: K) -> Result<(), Error>
where
    K: Resource + Clone + std::fmt::Debug + Serialize + DeserializeOwned,
    K::DynamicType: Default,
{
    let name = desired.name_any();
    match api.create(&PostParams::default(), &desired).await {
        Ok(_) => {
            debug!(name = %name, "created helper object");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            let existing = api.get(&name).await?;
            desired.meta_mut().resource_version = existing.resource_version();
            api.replace(&name, &PostParams::default(), &desired).await?;
            debug!(name = %name, "updated helper object");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn delete_ignoring_absent<K>(api: &Api<K>, name: &str) -> Result<(), Error>
where
    K: Resource + Clone + std::fmt::Debug + DeserializeOwned,
    K::DynamicType: Default,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}
