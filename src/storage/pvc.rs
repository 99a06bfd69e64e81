//! # PVC Storage Driver
//!
//! Filesystem storage on a persistent volume claim the user created. The operator
//! only checks that the claim exists; it never creates or deletes claims.

use crate::controller::conditions::{self, STORAGE_EXISTS};
use crate::crd::{ConditionStatus, ImageRegistry, PvcStorageConfig, StorageSpec};
use crate::storage::{env, mirror_status, status_mut, StorageContext, StorageError};
use k8s_openapi::api::core::v1::{
    EnvVar, PersistentVolumeClaimVolumeSource, Volume, VolumeMount,
};

/// Mount point of the claim inside the registry container
pub const ROOT_DIRECTORY: &str = "/registry";
const VOLUME_NAME: &str = "registry-storage";

/// Driver for a user-provided persistent volume claim
pub struct PvcDriver {
    config: PvcStorageConfig,
    ctx: StorageContext,
}

impl std::fmt::Debug for PvcDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PvcDriver")
            .field("claim", &self.config.claim)
            .finish_non_exhaustive()
    }
}

impl PvcDriver {
    #[must_use]
    pub fn new(config: &PvcStorageConfig, ctx: StorageContext) -> Self {
        Self {
            config: config.clone(),
            ctx,
        }
    }

    #[must_use]
    pub fn config_environment(&self) -> Vec<EnvVar> {
        vec![
            env("REGISTRY_STORAGE", "filesystem"),
            env("REGISTRY_STORAGE_FILESYSTEM_ROOTDIRECTORY", ROOT_DIRECTORY),
        ]
    }

    #[must_use]
    pub fn extra_mounts(&self) -> (Vec<Volume>, Vec<VolumeMount>) {
        let volume = Volume {
            name: VOLUME_NAME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: self.config.claim.clone(),
                read_only: None,
            }),
            ..Volume::default()
        };
        let mount = VolumeMount {
            name: VOLUME_NAME.to_string(),
            mount_path: ROOT_DIRECTORY.to_string(),
            ..VolumeMount::default()
        };
        (vec![volume], vec![mount])
    }

    /// Check the claim in the cache and record `StorageExists`
    pub fn storage_exists(&self, registry: &mut ImageRegistry) -> bool {
        if self.config.claim.is_empty() {
            conditions::set_condition(
                registry,
                STORAGE_EXISTS,
                ConditionStatus::False,
                "StorageNotConfigured",
                "Storage is not configured",
            );
            return false;
        }
        if self.ctx.listers.claim(&self.config.claim).is_some() {
            conditions::set_condition(
                registry,
                STORAGE_EXISTS,
                ConditionStatus::True,
                "PVC Exists",
                "PVC exists",
            );
            true
        } else {
            conditions::set_condition(
                registry,
                STORAGE_EXISTS,
                ConditionStatus::False,
                "PVC Not Found",
                &format!(
                    "PVC {}/{} does not exist",
                    self.ctx.listers.namespace(),
                    self.config.claim
                ),
            );
            false
        }
    }

    /// Adopt an existing claim. Claims are always user-managed.
    ///
    /// # Errors
    /// Returns [`StorageError::Unusable`] when the claim does not exist
    pub fn create_storage(&mut self, registry: &mut ImageRegistry) -> Result<(), StorageError> {
        if !self.storage_exists(registry) {
            return Err(StorageError::Unusable(format!(
                "persistent volume claim {:?} is not available",
                self.config.claim
            )));
        }
        status_mut(registry).storage_managed = false;
        mirror_status(registry, StorageSpec::Pvc(self.config.clone()));
        Ok(())
    }
}
