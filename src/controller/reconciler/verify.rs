//! # Verification
//!
//! Structural checks on the `ImageRegistry` that no amount of retrying can fix.

use crate::crd::{ImageRegistry, StorageSpec};

/// Validate the parts of the spec the operator relies on
///
/// # Errors
/// Returns a description of the first problem found
pub fn verify_resource(registry: &ImageRegistry) -> Result<(), String> {
    if registry.spec.replicas < 0 {
        return Err("replicas must be greater than or equal to 0".to_string());
    }

    match registry.spec.storage.as_ref() {
        Some(StorageSpec::Pvc(pvc)) if pvc.claim.is_empty() => {
            Err("storage.pvc.claim must not be empty".to_string())
        }
        Some(StorageSpec::S3(s3)) => match s3.cloud_front.as_ref() {
            Some(cf) if cf.base_url.is_empty() => {
                Err("storage.s3.cloudFront.baseURL must not be empty".to_string())
            }
            Some(cf) if cf.keypair_id.is_empty() => {
                Err("storage.s3.cloudFront.keypairID must not be empty".to_string())
            }
            Some(cf) if cf.private_key.name.is_empty() || cf.private_key.key.is_empty() => Err(
                "storage.s3.cloudFront.privateKey must name a secret and a key".to_string(),
            ),
            _ => Ok(()),
        },
        _ => Ok(()),
    }
}
