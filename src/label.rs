//! Label and annotation vocabulary used on managed objects.

/// Cluster identity label on the management secret.
pub const CLUSTER: &str = "giantswarm.io/cluster";

/// Denotes which operator manages the resource.
pub const MANAGED_BY: &str = "giantswarm.io/managed-by";

/// Marks the secret as a generated random-key secret.
pub const RANDOM_KEY: &str = "giantswarm.io/randomkey";

/// The [`RANDOM_KEY`] flavor used for encryption-provider secrets.
pub const RANDOM_KEY_TYPE_ENCRYPTION: &str = "encryption";

/// Cluster API cluster-name label.
pub const CLUSTER_NAME: &str = "cluster.x-k8s.io/cluster-name";

/// Release-version label on Cluster objects from the previous product
/// generation; absent on pure Cluster API clusters.
pub const RELEASE_VERSION: &str = "release.giantswarm.io/version";

/// Annotation permitting key rotation on a cluster.
pub const ENABLE_ROTATION: &str = "giantswarm.io/encryption-enable-rotation";

/// Annotation requesting a rotation on the next reconcile regardless of
/// elapsed time. Cleared once the rotation begins.
pub const FORCE_ROTATION: &str = "giantswarm.io/encryption-force-rotation";

/// Annotation marking that a rotation has begun and a second key is present.
pub const ROTATION_IN_PROGRESS: &str = "giantswarm.io/encryption-rotation-in-progress";

/// Annotation carrying the RFC3339 timestamp of the last completed rotation.
pub const LAST_ROTATION: &str = "giantswarm.io/encryption-last-rotation";

/// Annotation written onto every workload Secret during the rewrite sweep.
pub const REWRITED_AT: &str = "giantswarm.io/encryption-rewrited-at";
