//! Rotation state encoded on the management secret.
//!
//! The state machine has no resource of its own; it piggybacks on
//! annotations of the encryption-provider secret. This module is the only
//! place that reads or writes those annotations, so the rest of the state
//! machine works with an explicit [`RotationState`] and exhaustive matches.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;

use crate::error::Error;
use crate::label;

/// Where a cluster stands in the key-rotation protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RotationState {
    /// A single writer key is active; no rotation underway.
    Steady {
        /// Completion time of the last rotation, if one ever finished.
        last_rotation: Option<DateTime<Utc>>,
    },
    /// A second key has been introduced; waiting for every control-plane
    /// node to adopt the new configuration before the rewrite sweep.
    AwaitQuorum,
}

impl RotationState {
    /// Decode the state from the management secret's annotations.
    pub fn from_secret(secret: &Secret) -> Result<Self, Error> {
        if annotation(secret, label::ROTATION_IN_PROGRESS).is_some() {
            return Ok(Self::AwaitQuorum);
        }

        let last_rotation = match annotation(secret, label::LAST_ROTATION) {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| {
                        Error::parse(format!("invalid last-rotation timestamp {raw:?}: {e}"))
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        Ok(Self::Steady { last_rotation })
    }
}

/// Whether rotation is permitted on this cluster.
pub fn rotation_enabled(secret: &Secret) -> bool {
    annotation(secret, label::ENABLE_ROTATION).is_some()
}

/// Whether an immediate rotation was requested.
pub fn force_requested(secret: &Secret) -> bool {
    annotation(secret, label::FORCE_ROTATION).is_some()
}

pub(crate) fn annotation<'a>(secret: &'a Secret, key: &str) -> Option<&'a str> {
    secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

pub(crate) fn set_annotation(secret: &mut Secret, key: &str, value: impl Into<String>) {
    secret
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.into());
}

pub(crate) fn clear_annotation(secret: &mut Secret, key: &str) {
    if let Some(annotations) = secret.metadata.annotations.as_mut() {
        annotations.remove(key);
    }
}
