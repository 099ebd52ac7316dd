//! Typed model of the apiserver encryption-provider configuration document.
//!
//! The apiserver reads a small YAML document declaring, per resource kind, an
//! ordered list of cryptographic providers. It writes with the first key of
//! the first provider and reads by trying providers and keys in order. The
//! model here keeps the provider list as a tagged union so every list element
//! serializes as exactly one single-key mapping; modeling providers as a
//! product type with all fields optional makes ambiguous documents
//! representable and is a known source of bugs.
//!
//! Documents written by this operator always satisfy:
//!
//! - `resources` has exactly one element, covering exactly `["secrets"]`
//! - the last provider is always `identity: {}`
//! - at most one `secretbox` and at most one `aescbc` provider
//! - no provider carries more than [`MAX_PROVIDER_KEYS`] keys

pub mod transform;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::key;

/// `kind` of every document this operator writes.
pub const CONFIG_KIND: &str = "EncryptionConfig";

/// `apiVersion` of every document this operator writes.
pub const CONFIG_API_VERSION: &str = "v1";

/// Data key under which the serialized document lives in the management secret.
pub const ENCRYPTION_CONFIG_KEY: &str = "encryption";

/// Upper bound on keys carried by a single provider.
pub const MAX_PROVIDER_KEYS: usize = 2;

/// Complete configuration for encryption providers.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct EncryptionConfiguration {
    /// Document kind, always [`CONFIG_KIND`].
    pub kind: String,
    /// Document API version, always [`CONFIG_API_VERSION`].
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// Resource kinds and their corresponding providers.
    pub resources: Vec<ResourceConfiguration>,
}

/// Per-resource-kind provider configuration.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ResourceConfiguration {
    /// Kubernetes resource kinds covered by the providers below.
    pub resources: Vec<String>,
    /// Ordered provider list; the first provider encrypts new writes.
    pub providers: Vec<Provider>,
}

/// One encryption provider entry.
///
/// Externally tagged, so each entry serializes as a single-key mapping such
/// as `secretbox: {keys: [...]}` or `identity: {}`. YAML ordering of the
/// list is semantically significant to the apiserver.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// XSalsa20-Poly1305 transformer, the default for new keys.
    Secretbox(KeyedProvider),
    /// AES-CBC transformer, kept for keys migrated from the legacy product.
    Aescbc(KeyedProvider),
    /// AES-GCM transformer.
    Aesgcm(KeyedProvider),
    /// Envelope transformer backed by a KMS plugin.
    Kms(KmsConfiguration),
    /// Cleartext sentinel; present last so objects written before
    /// encryption was enabled remain readable.
    Identity(IdentityConfiguration),
}

/// Key list carried by the symmetric-key transformers.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct KeyedProvider {
    /// Ordered key list; the first key is the newest.
    pub keys: Vec<Key>,
}

/// Name and secret of one provider key.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Key {
    /// Key name recorded next to data written with this key, `key<N>`.
    pub name: String,
    /// The key material, base64-encoded.
    pub secret: String,
}

/// Empty body of the identity provider.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct IdentityConfiguration {}

/// Configuration of a KMS envelope transformer.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct KmsConfiguration {
    /// Name of the KMS plugin.
    pub name: String,
    /// gRPC listening address of the plugin.
    pub endpoint: String,
    /// Maximum number of secrets cached in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<i32>,
    /// Timeout for gRPC calls to the plugin, e.g. `5s`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl Provider {
    /// The key list of a symmetric-key provider, `None` for kms/identity.
    pub fn keys(&self) -> Option<&[Key]> {
        match self {
            Provider::Secretbox(p) | Provider::Aescbc(p) | Provider::Aesgcm(p) => Some(&p.keys),
            Provider::Kms(_) | Provider::Identity(_) => None,
        }
    }

    /// Whether this is the secretbox provider.
    pub fn is_secretbox(&self) -> bool {
        matches!(self, Provider::Secretbox(_))
    }

    /// Whether this is the aescbc provider.
    pub fn is_aescbc(&self) -> bool {
        matches!(self, Provider::Aescbc(_))
    }

    /// Whether this is the identity sentinel.
    pub fn is_identity(&self) -> bool {
        matches!(self, Provider::Identity(_))
    }
}

impl EncryptionConfiguration {
    /// Decode a document from its YAML serialization.
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        serde_yaml::from_slice(bytes)
            .map_err(|e| Error::parse(format!("invalid encryption configuration: {e}")))
    }

    /// Encode the document to YAML.
    ///
    /// The emitter is deterministic: structurally equal documents serialize
    /// to identical bytes, which the checksum comparison in the quorum check
    /// depends on.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| Error::serialization(format!("encryption configuration: {e}")))?;
        Ok(yaml.into_bytes())
    }

    /// Document for a cluster's first, freshly generated secretbox key.
    pub fn initial_secretbox(secret: &str) -> Self {
        Self::initial(Provider::Secretbox(KeyedProvider {
            keys: vec![Key {
                name: key::key_name(1),
                secret: secret.to_string(),
            }],
        }))
    }

    /// Document seeded with a single AES-CBC key migrated from the legacy
    /// product, so existing data stays readable.
    pub fn initial_aescbc(secret: &str) -> Self {
        Self::initial(Provider::Aescbc(KeyedProvider {
            keys: vec![Key {
                name: key::key_name(1),
                secret: secret.to_string(),
            }],
        }))
    }

    fn initial(writer: Provider) -> Self {
        Self {
            kind: CONFIG_KIND.to_string(),
            api_version: CONFIG_API_VERSION.to_string(),
            resources: vec![ResourceConfiguration {
                resources: vec!["secrets".to_string()],
                providers: vec![writer, Provider::Identity(IdentityConfiguration::default())],
            }],
        }
    }

    /// The ordered provider list of the single resource element.
    pub fn providers(&self) -> &[Provider] {
        self.resources.first().map(|r| r.providers.as_slice()).unwrap_or(&[])
    }
}
