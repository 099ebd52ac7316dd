//! Control-plane adoption check against published config checksums.
//!
//! The checksum helper (see [`crate::hasher`]) writes, per control-plane
//! node, the hex SHAKE-256 digest of the encryption-provider config file as
//! that node sees it on disk. A rotation may only proceed to the rewrite
//! sweep once every control-plane node runs the current configuration,
//! otherwise a node still writing with the old key could produce data the
//! retired key is needed for.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Node, Secret};
use k8s_openapi::ByteString;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;
use tracing::{debug, warn};

use crate::error::Error;

/// Secret the checksum helper publishes into, keyed by node name.
pub const CHECKSUM_SECRET_NAME: &str = "encryption-provider-config-shake256";

/// Namespace of the checksum secret in the workload cluster.
pub const CHECKSUM_SECRET_NAMESPACE: &str = "kube-system";

/// Digest length in bytes.
const CHECKSUM_LENGTH: usize = 64;

/// Node labels marking a control-plane node; either one counts.
const CONTROL_PLANE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// Control-plane node counts the operator considers settled.
const EXPECTED_CONTROL_PLANE_COUNTS: [usize; 3] = [1, 3, 5];

/// Digest of the config file as the checksum helper records it.
///
/// The helper formats the digest as lowercase hex followed by a newline;
/// the trailing newline is part of the recorded value and must be
/// reproduced exactly for the comparison below to ever succeed.
pub fn expected_checksum(config: &[u8]) -> String {
    let mut hasher = Shake256::default();
    hasher.update(config);
    let mut digest = [0u8; CHECKSUM_LENGTH];
    hasher.finalize_xof().read(&mut digest);
    format!("{}\n", hex::encode(digest))
}

/// Whether every control-plane node of the workload cluster runs `config`.
///
/// Absent checksum secret and unexpected node counts both report "not
/// ready" without an error; they are normal while the helper starts up or
/// the control plane is in transition.
pub async fn control_plane_adopted(wc_client: &Client, config: &[u8]) -> Result<bool, Error> {
    let secrets: Api<Secret> = Api::namespaced(wc_client.clone(), CHECKSUM_SECRET_NAMESPACE);
    let checksum_secret = match secrets.get_opt(CHECKSUM_SECRET_NAME).await? {
        Some(secret) => secret,
        None => {
            debug!("checksum secret not published yet");
            return Ok(false);
        }
    };
    let checksums = checksum_secret.data.unwrap_or_default();

    let nodes: Api<Node> = Api::all(wc_client.clone());
    let node_list = nodes.list(&ListParams::default()).await?;
    let control_plane: Vec<String> = node_list
        .items
        .iter()
        .filter(|node| is_control_plane(node))
        .map(|node| node.name_any())
        .collect();

    Ok(quorum_reached(
        &control_plane,
        &checksums,
        &expected_checksum(config),
    ))
}

fn is_control_plane(node: &Node) -> bool {
    node.metadata
        .labels
        .as_ref()
        .is_some_and(|labels| CONTROL_PLANE_LABELS.iter().any(|l| labels.contains_key(*l)))
}

fn quorum_reached(
    control_plane: &[String],
    checksums: &BTreeMap<String, ByteString>,
    expected: &str,
) -> bool {
    if !EXPECTED_CONTROL_PLANE_COUNTS.contains(&control_plane.len()) {
        warn!(
            count = control_plane.len(),
            "unexpected control-plane node count, treating as not ready"
        );
        return false;
    }

    control_plane.iter().all(|node| {
        let up_to_date = checksums
            .get(node)
            .is_some_and(|recorded| recorded.0 == expected.as_bytes());
        if !up_to_date {
            debug!(node = %node, "node has not adopted the current configuration");
        }
        up_to_date
    })
}
