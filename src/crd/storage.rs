//! # Storage Configuration
//!
//! Tagged union over the storage backends the registry can use. Exactly one arm
//! is active; the same type is mirrored into status once a driver has converged it.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum StorageSpec {
    /// Amazon S3 (or S3-compatible) bucket
    S3(S3StorageConfig),
    /// Azure Blob container inside a storage account
    Azure(AzureStorageConfig),
    /// User-managed persistent volume claim
    Pvc(PvcStorageConfig),
}

impl StorageSpec {
    /// Short provider label used in logs and metrics
    #[must_use]
    pub fn provider(&self) -> &'static str {
        match self {
            Self::S3(_) => "s3",
            Self::Azure(_) => "azure",
            Self::Pvc(_) => "pvc",
        }
    }
}

/// S3 bucket configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3StorageConfig {
    /// Bucket name. Generated from the infrastructure name when empty.
    #[serde(default)]
    pub bucket: String,
    /// Bucket region. Defaults to the cluster's AWS region.
    #[serde(default)]
    pub region: String,
    /// Endpoint for S3-compatible services
    #[serde(default)]
    pub region_endpoint: String,
    /// Whether the registry should request server-side encryption
    #[serde(default)]
    pub encrypt: bool,
    /// KMS key used for default bucket encryption (AES256 when empty)
    #[serde(default, rename = "keyID")]
    pub key_id: String,
    /// CloudFront middleware in front of the bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_front: Option<S3CloudFrontConfig>,
}

/// CloudFront middleware configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3CloudFrontConfig {
    /// Distribution base URL
    #[serde(rename = "baseURL")]
    pub base_url: String,
    /// Secret holding the signing private key
    pub private_key: SecretKeyRef,
    /// CloudFront key pair id
    #[serde(rename = "keypairID")]
    pub keypair_id: String,
    /// Signed URL validity (e.g. "20m")
    #[serde(default)]
    pub duration: String,
}

/// Reference to one key inside a secret in the operator namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

/// Azure Blob configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzureStorageConfig {
    /// Storage account name. Generated from the infrastructure name when empty.
    #[serde(default)]
    pub account_name: String,
    /// Blob container name
    #[serde(default)]
    pub container: String,
}

/// Persistent volume claim configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PvcStorageConfig {
    /// Name of an existing claim in the operator namespace
    pub claim: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_spec_uses_provider_key() {
        let spec: StorageSpec = serde_json::from_value(serde_json::json!({
            "s3": { "bucket": "b", "region": "us-east-1", "keyID": "k" }
        }))
        .unwrap();
        match spec {
            StorageSpec::S3(s3) => {
                assert_eq!(s3.bucket, "b");
                assert_eq!(s3.key_id, "k");
                assert!(s3.cloud_front.is_none());
            }
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn test_azure_fields_default_to_empty() {
        let spec: StorageSpec =
            serde_json::from_value(serde_json::json!({ "azure": {} })).unwrap();
        assert_eq!(spec, StorageSpec::Azure(AzureStorageConfig::default()));
        assert_eq!(spec.provider(), "azure");
    }
}
