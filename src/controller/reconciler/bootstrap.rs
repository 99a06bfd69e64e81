//! # Bootstrap
//!
//! Creates the default `ImageRegistry` when none exists, picking a storage
//! backend from the platform the cluster runs on.

use crate::constants::{CLUSTER_RESOURCE_NAME, REGISTRY_FINALIZER};
use crate::controller::client::ClientError;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::crd::{
    AzureStorageConfig, ImageRegistry, ImageRegistrySpec, Infrastructure, ManagementState,
    PlatformType, S3StorageConfig, StorageSpec,
};
use kube::api::ObjectMeta;
use tracing::{debug, info};

/// Storage a fresh cluster starts with
///
/// Unknown platforms get no storage; the registry then reports
/// `StorageNotConfigured` until an administrator picks one.
#[must_use]
pub fn platform_storage(infrastructure: Option<&Infrastructure>) -> Option<StorageSpec> {
    let infra = infrastructure?;
    match infra.platform() {
        PlatformType::Aws => Some(StorageSpec::S3(S3StorageConfig {
            region: infra.aws_region().to_string(),
            ..S3StorageConfig::default()
        })),
        PlatformType::Azure => Some(StorageSpec::Azure(AzureStorageConfig::default())),
        _ => None,
    }
}

/// The default instance created on first start
#[must_use]
pub fn default_registry(infrastructure: Option<&Infrastructure>) -> ImageRegistry {
    ImageRegistry {
        metadata: ObjectMeta {
            name: Some(CLUSTER_RESOURCE_NAME.to_string()),
            finalizers: Some(vec![REGISTRY_FINALIZER.to_string()]),
            ..ObjectMeta::default()
        },
        spec: ImageRegistrySpec {
            management_state: ManagementState::Managed,
            storage: platform_storage(infrastructure),
            ..ImageRegistrySpec::default()
        },
        status: None,
    }
}

impl Reconciler {
    /// Create the default `ImageRegistry`
    ///
    /// An existing object (the cache lagging behind the API server) is not an error;
    /// its add event triggers the next sync.
    ///
    /// # Errors
    /// Returns the API error when the create fails for any other reason
    pub async fn bootstrap(&self) -> Result<(), ReconcilerError> {
        let infrastructure = self.listers.infrastructure();
        let registry = default_registry(infrastructure.as_deref());
        let provider = registry
            .spec
            .storage
            .as_ref()
            .map_or("none", StorageSpec::provider);

        info!(name = CLUSTER_RESOURCE_NAME, provider, "Bootstrapping ImageRegistry");
        match self.client.create(&registry).await {
            Ok(_) => Ok(()),
            Err(ClientError::AlreadyExists(name)) => {
                debug!(name, "ImageRegistry already exists, waiting for the cache");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
