//! # Credential Secrets
//!
//! Layered credential lookup: the user-supplied
//! `image-registry-private-configuration-user` secret overrides the
//! `installer-cloud-credentials` secret minted by the cloud credential operator.
//! Values are held in zeroizing buffers and never logged.

use crate::constants::{CLOUD_CREDENTIALS_SECRET, USER_CONFIGURATION_SECRET};
use crate::controller::cache::Listers;
use crate::storage::StorageError;
use k8s_openapi::api::core::v1::Secret;
use std::collections::BTreeMap;
use zeroize::Zeroizing;

/// Decoded string values of one secret
pub struct SecretValues {
    name: String,
    data: BTreeMap<String, Zeroizing<String>>,
}

impl std::fmt::Debug for SecretValues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretValues")
            .field("name", &self.name)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SecretValues {
    /// Decode `data` and `stringData`. Keys whose bytes are not UTF-8 are skipped.
    #[must_use]
    pub fn from_secret(secret: &Secret) -> Self {
        let mut data = BTreeMap::new();
        if let Some(raw) = &secret.data {
            for (key, value) in raw {
                if let Ok(text) = String::from_utf8(value.0.clone()) {
                    data.insert(key.clone(), Zeroizing::new(text));
                }
            }
        }
        if let Some(strings) = &secret.string_data {
            for (key, value) in strings {
                data.insert(key.clone(), Zeroizing::new(value.clone()));
            }
        }
        Self {
            name: secret.metadata.name.clone().unwrap_or_default(),
            data,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `key` is present at all, even with an empty value
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Non-empty value for `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Non-empty value for `key`, or a configuration error naming the secret
    ///
    /// # Errors
    /// Returns [`StorageError::Config`] when the key is missing or empty
    pub fn require(&self, key: &str) -> Result<Zeroizing<String>, StorageError> {
        self.get(key)
            .map(|v| Zeroizing::new(v.to_string()))
            .ok_or_else(|| {
                StorageError::Config(format!(
                    "secret {} is missing a value for {key}",
                    self.name
                ))
            })
    }
}

/// The user-supplied override secret, if present
#[must_use]
pub fn user_secret(listers: &Listers) -> Option<SecretValues> {
    listers
        .secret(USER_CONFIGURATION_SECRET)
        .map(|s| SecretValues::from_secret(&s))
}

/// The cluster-minted cloud credentials
///
/// # Errors
/// Returns [`StorageError::Config`] when the secret does not exist
pub fn cloud_credentials(listers: &Listers) -> Result<SecretValues, StorageError> {
    listers
        .secret(CLOUD_CREDENTIALS_SECRET)
        .map(|s| SecretValues::from_secret(&s))
        .ok_or_else(|| {
            StorageError::Config(format!(
                "unable to get cluster minted credentials: secret {}/{CLOUD_CREDENTIALS_SECRET} not found",
                listers.namespace()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;

    fn secret(pairs: &[(&str, &[u8])]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("creds".into()),
                ..ObjectMeta::default()
            },
            data: Some(
                pairs
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), ByteString(v.to_vec())))
                    .collect(),
            ),
            ..Secret::default()
        }
    }

    #[test]
    fn test_empty_values_are_missing() {
        let values = SecretValues::from_secret(&secret(&[("a", b"x"), ("b", b"")]));
        assert_eq!(values.get("a"), Some("x"));
        assert!(values.contains("b"));
        assert_eq!(values.get("b"), None);
        assert!(values.require("b").is_err());
        assert!(values.require("c").is_err());
    }

    #[test]
    fn test_debug_does_not_leak_values() {
        let values = SecretValues::from_secret(&secret(&[("key", b"hunter2")]));
        let rendered = format!("{values:?}");
        assert!(rendered.contains("key"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_non_utf8_values_are_skipped() {
        let values = SecretValues::from_secret(&secret(&[("bin", &[0xff, 0xfe])]));
        assert!(!values.contains("bin"));
    }
}
