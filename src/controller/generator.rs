//! # Resource Generator
//!
//! Drives the storage driver for one sync and produces what the registry
//! workload needs from it:
//!
//! 1. Probe the storage; create or converge it when it is missing or the desired
//!    configuration moved away from the last converged one.
//! 2. Write the driver's access credentials into the private configuration secret.
//! 3. Return the environment and mounts for the registry deployment.

use crate::controller::cache::Listers;
use crate::controller::client::{ClientError, RegistryClient};
use crate::crd::ImageRegistry;
use crate::storage::{
    ProxySettings, StorageBackends, StorageContext, StorageDriver, StorageError, StorageSettings,
};
use k8s_openapi::api::core::v1::{EnvVar, Volume, VolumeMount};
use std::sync::Arc;
use tracing::{debug, info, Instrument};

/// Errors from [`Generator`]
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("unable to write the private configuration secret: {0}")]
    Secret(#[source] ClientError),
    /// The driver asked to be called again before removal completes
    #[error("storage removal has not finished yet")]
    RemovalPending,
}

impl GeneratorError {
    /// Storage is absent from the spec; retrying cannot help
    #[must_use]
    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::Storage(StorageError::NotConfigured))
    }
}

/// Storage-related parts of the registry workload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageProjection {
    pub env: Vec<EnvVar>,
    pub volumes: Vec<Volume>,
    pub volume_mounts: Vec<VolumeMount>,
}

/// Applies and removes the storage for the registry
pub struct Generator {
    client: Arc<dyn RegistryClient>,
    backends: Arc<dyn StorageBackends>,
    settings: StorageSettings,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Generator {
    #[must_use]
    pub fn new(
        client: Arc<dyn RegistryClient>,
        backends: Arc<dyn StorageBackends>,
        settings: StorageSettings,
    ) -> Self {
        Self {
            client,
            backends,
            settings,
        }
    }

    fn driver(
        &self,
        registry: &ImageRegistry,
        listers: &Listers,
        proxy: &ProxySettings,
    ) -> Result<StorageDriver, StorageError> {
        StorageDriver::for_registry(
            registry,
            StorageContext {
                listers: listers.clone(),
                proxy: proxy.clone(),
                backends: Arc::clone(&self.backends),
                settings: self.settings.clone(),
            },
        )
    }

    /// Converge storage and the private configuration secret
    ///
    /// # Errors
    /// Returns [`StorageError::NotConfigured`] (wrapped) when the spec has no storage,
    /// and any driver or secret write failure
    pub async fn apply(
        &self,
        registry: &mut ImageRegistry,
        listers: &Listers,
        proxy: &ProxySettings,
    ) -> Result<StorageProjection, GeneratorError> {
        let mut driver = self.driver(registry, listers, proxy)?;
        let provider = driver.provider();
        let span = tracing::info_span!("generator.apply", provider);

        async {
            let exists = driver.storage_exists(registry).await?;
            if !exists || driver.storage_changed(registry) {
                info!(provider, exists, "Converging registry storage");
                driver.create_storage(registry).await?;
            }

            let secrets = driver.fetch_secrets().await?;
            if !secrets.is_empty() {
                self.client
                    .apply_secret(secrets)
                    .await
                    .map_err(GeneratorError::Secret)?;
                debug!(provider, "Private configuration secret is up to date");
            }

            let mut env = driver.config_environment();
            env.extend(proxy.env_vars());
            let (volumes, volume_mounts) = driver.extra_mounts();
            Ok::<_, GeneratorError>(StorageProjection {
                env,
                volumes,
                volume_mounts,
            })
        }
        .instrument(span)
        .await
    }

    /// Remove storage the operator created
    ///
    /// Absent storage configuration means there is nothing to remove.
    ///
    /// # Errors
    /// Returns an error when a deletion fails or has to be retried
    pub async fn remove(
        &self,
        registry: &mut ImageRegistry,
        listers: &Listers,
        proxy: &ProxySettings,
    ) -> Result<(), GeneratorError> {
        let mut driver = match self.driver(registry, listers, proxy) {
            Ok(driver) => driver,
            Err(StorageError::NotConfigured) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let provider = driver.provider();
        let retry = driver
            .remove_storage(registry)
            .instrument(tracing::info_span!("generator.remove", provider))
            .await?;
        if retry {
            return Err(GeneratorError::RemovalPending);
        }
        Ok(())
    }
}
