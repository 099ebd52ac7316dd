//! Pure transformations of the encryption configuration document.
//!
//! Both operations preserve the document invariants: the identity sentinel
//! stays last, secretbox and aescbc stay unique, key names stay `key<N>`
//! with the newest key first, and the first provider remains the one the
//! apiserver writes with.

use crate::config::{EncryptionConfiguration, Key, KeyedProvider, Provider, MAX_PROVIDER_KEYS};
use crate::error::Error;
use crate::key;

/// Introduce `new_secret` as the newest writer key.
///
/// If a secretbox provider exists, the key is prepended to its list under
/// the next free `key<N>` name and the provider is moved to the head of the
/// provider list. If the provider already carries [`MAX_PROVIDER_KEYS`]
/// keys the document is returned unchanged; callers detect that case with
/// [`secretbox_at_key_limit`] before generating a key. Without a secretbox
/// provider a fresh one is inserted at position 0 carrying `key1`.
pub fn add_key(
    mut doc: EncryptionConfiguration,
    new_secret: &str,
) -> Result<EncryptionConfiguration, Error> {
    let providers = providers_mut(&mut doc)?;

    match providers.iter().position(Provider::is_secretbox) {
        Some(idx) => {
            if let Provider::Secretbox(secretbox) = &mut providers[idx] {
                if secretbox.keys.len() >= MAX_PROVIDER_KEYS {
                    return Ok(doc);
                }
                let next = key::max_key_index(&secretbox.keys)? + 1;
                secretbox.keys.insert(
                    0,
                    Key {
                        name: key::key_name(next),
                        secret: new_secret.to_string(),
                    },
                );
            }
            // The provider holding the new key becomes the active writer.
            if idx != 0 {
                let secretbox = providers.remove(idx);
                providers.insert(0, secretbox);
            }
        }
        None => {
            providers.insert(
                0,
                Provider::Secretbox(KeyedProvider {
                    keys: vec![Key {
                        name: key::key_name(1),
                        secret: new_secret.to_string(),
                    }],
                }),
            );
        }
    }

    Ok(doc)
}

/// Retire the oldest key after a completed rotation.
///
/// An aescbc provider, if present, is removed as a whole; that is how the
/// legacy AES-CBC key is retired once the cluster writes with secretbox.
/// Otherwise the oldest (last) secretbox key is dropped, unless it is the
/// only one left.
pub fn remove_old_key(mut doc: EncryptionConfiguration) -> Result<EncryptionConfiguration, Error> {
    let providers = providers_mut(&mut doc)?;

    if let Some(idx) = providers.iter().position(Provider::is_aescbc) {
        providers.remove(idx);
        return Ok(doc);
    }

    if let Some(Provider::Secretbox(secretbox)) =
        providers.iter_mut().find(|p| p.is_secretbox())
    {
        if secretbox.keys.len() >= 2 {
            secretbox.keys.pop();
        }
    }

    Ok(doc)
}

/// Whether the secretbox provider already carries the maximum number of
/// keys, so [`add_key`] would not introduce another one.
pub fn secretbox_at_key_limit(doc: &EncryptionConfiguration) -> bool {
    doc.providers()
        .iter()
        .find(|p| p.is_secretbox())
        .and_then(Provider::keys)
        .is_some_and(|keys| keys.len() >= MAX_PROVIDER_KEYS)
}

fn providers_mut(doc: &mut EncryptionConfiguration) -> Result<&mut Vec<Provider>, Error> {
    doc.resources
        .first_mut()
        .map(|r| &mut r.providers)
        .ok_or_else(|| Error::parse("encryption configuration has no resource element"))
}
