//! Typed external resources the operator consumes and produces.
//!
//! Neither type is a CRD owned by this operator: `Cluster` belongs to
//! Cluster API and `Chart` to the chart-operator running inside workload
//! clusters. Only the fields this operator touches are modeled; unknown
//! fields pass through the apiserver untouched.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification of a Cluster API cluster.
///
/// The operator reconciles on these objects but never edits the spec; it
/// only reads metadata (name, namespace, labels, deletion timestamp) and
/// manages its finalizer.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    plural = "clusters",
    status = "ClusterStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Whether reconciliation of the cluster is paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,

    /// Endpoint used to communicate with the cluster's control plane.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,
}

/// Host and port of a control-plane endpoint.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ApiEndpoint {
    /// Hostname or IP address.
    pub host: String,
    /// Port number.
    pub port: i32,
}

/// Observed state of a Cluster API cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Lifecycle phase as reported by Cluster API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Whether the cluster infrastructure is provisioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ready: Option<bool>,
}

/// Specification of a chart-operator Chart.
///
/// Deployed into workload clusters to run the config checksum helper.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "application.giantswarm.io",
    version = "v1alpha1",
    kind = "Chart",
    plural = "charts",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    /// Release name of the chart.
    pub name: String,

    /// Namespace the chart's workload is deployed into.
    pub namespace: String,

    /// Location of the packaged chart.
    #[serde(rename = "tarballURL")]
    pub tarball_url: String,

    /// Chart version.
    pub version: String,

    /// Values configuration for the release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ChartConfig>,
}

/// Values configuration reference of a Chart.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    /// ConfigMap holding the values document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ChartConfigMapRef>,
}

/// Reference to a values ConfigMap.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ChartConfigMapRef {
    /// Name of the ConfigMap.
    pub name: String,
    /// Namespace of the ConfigMap.
    pub namespace: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn cluster_resource_targets_the_capi_group() {
        assert_eq!(Cluster::group(&()), "cluster.x-k8s.io");
        assert_eq!(Cluster::version(&()), "v1beta1");
        assert_eq!(Cluster::kind(&()), "Cluster");
    }

    #[test]
    fn chart_resource_targets_the_application_group() {
        assert_eq!(Chart::group(&()), "application.giantswarm.io");
        assert_eq!(Chart::version(&()), "v1alpha1");
        assert_eq!(Chart::plural(&()), "charts");
    }

    #[test]
    fn chart_spec_serializes_the_tarball_url_field() {
        let spec = ChartSpec {
            name: "encryption-config-hasher".to_string(),
            namespace: "kube-system".to_string(),
            tarball_url: "https://example.com/chart-1.0.0.tgz".to_string(),
            version: "1.0.0".to_string(),
            config: None,
        };

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["tarballURL"], "https://example.com/chart-1.0.0.tgz");
        assert!(json.get("config").is_none());
    }

    #[test]
    fn cluster_spec_tolerates_unknown_manifest_fields() {
        let raw = serde_json::json!({
            "paused": false,
            "clusterNetwork": {"services": {"cidrBlocks": ["10.96.0.0/12"]}},
            "infrastructureRef": {"kind": "AWSCluster", "name": "abc12"}
        });
        let spec: ClusterSpec = serde_json::from_value(raw).unwrap();
        assert_eq!(spec.paused, Some(false));
    }
}
