//! # Sync
//!
//! One reconciliation pass over the singleton `ImageRegistry`.
//!
//! ## Flow
//!
//! 1. Resolve the cluster proxy into [`ProxySettings`]
//! 2. Read the registry from the cache, bootstrapping it when absent
//! 3. Work on an owned copy and keep a second one for diffing
//! 4. Deleting: finalize and stop
//! 5. Dispatch on the management state, holding on to the error
//! 6. Recompute derived conditions from the registry deployment
//! 7. Persist metadata/spec changes, then status changes
//! 8. Surface the dispatch error unless it is permanent

use crate::controller::client::ClientError;
use crate::controller::reconciler::finalize::append_finalizer;
use crate::controller::reconciler::status::sync_status;
use crate::controller::reconciler::types::{
    PermanentError, Reconciler, ReconcilerError, REASON_STORAGE_NOT_CONFIGURED,
    REASON_VERIFICATION_FAILED,
};
use crate::controller::reconciler::verify::verify_resource;
use crate::crd::{ImageRegistry, ImageRegistryStatus, ManagementState};
use crate::storage::ProxySettings;
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

impl Reconciler {
    /// Reconcile the registry once
    ///
    /// # Errors
    /// Returns transient failures the caller should retry. Permanent failures are
    /// recorded in conditions and reported as success.
    pub async fn sync(&self) -> Result<(), ReconcilerError> {
        let proxy = ProxySettings::from_cluster(self.listers.proxy().as_deref());

        let Some(cached) = self.listers.registry() else {
            return self.bootstrap().await;
        };
        let mut registry = (*cached).clone();
        let previous = (*cached).clone();

        if registry.metadata.deletion_timestamp.is_some() {
            return self.finalize(&mut registry, &proxy).await;
        }

        let mut removed = false;
        let apply_error = match registry.spec.management_state {
            ManagementState::Removed => {
                removed = true;
                self.remove_resources(&mut registry, &proxy).await.err()
            }
            ManagementState::Managed => self
                .create_or_update_resources(&mut registry, &proxy)
                .await
                .err(),
            ManagementState::Unmanaged => None,
            ManagementState::Unknown => {
                warn!(
                    name = %registry.name_any(),
                    "Unknown management state, leaving the registry alone"
                );
                None
            }
        };

        let deployment = self.listers.deployment();
        sync_status(
            &mut registry,
            deployment.as_deref(),
            apply_error.as_ref(),
            removed,
        );

        registry
            .status
            .get_or_insert_with(ImageRegistryStatus::default)
            .observed_generation = registry.metadata.generation;
        self.persist(&previous, &mut registry).await?;

        match apply_error {
            Some(e) if e.is_permanent() => {
                debug!(error = %e, "Permanent error recorded in conditions");
                Ok(())
            }
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Write metadata/spec changes, then status changes, relative to `previous`
    ///
    /// # Errors
    /// Returns the first failed write
    pub(super) async fn persist(
        &self,
        previous: &ImageRegistry,
        registry: &mut ImageRegistry,
    ) -> Result<(), ReconcilerError> {
        let metadata_changed = previous.metadata != registry.metadata;
        let spec_changed = previous.spec != registry.spec;
        if metadata_changed || spec_changed {
            info!(
                name = %registry.name_any(),
                metadata = metadata_changed,
                spec = spec_changed,
                "Object changed, updating"
            );
            let updated = self
                .client
                .update(registry)
                .await
                .inspect_err(|e| log_write_error("update", e))?;
            registry.metadata.resource_version = updated.metadata.resource_version;
        }

        if previous.status != registry.status {
            info!(name = %registry.name_any(), "Status changed, updating");
            self.client
                .update_status(registry)
                .await
                .inspect_err(|e| log_write_error("update status", e))?;
        }
        Ok(())
    }

    async fn create_or_update_resources(
        &self,
        registry: &mut ImageRegistry,
        proxy: &ProxySettings,
    ) -> Result<(), ReconcilerError> {
        append_finalizer(registry);

        verify_resource(registry).map_err(|e| {
            PermanentError::new(
                REASON_VERIFICATION_FAILED,
                format!("unable to complete resource: {e}"),
            )
        })?;

        match self.generator.apply(registry, &self.listers, proxy).await {
            Ok(projection) => {
                debug!(
                    env = projection.env.len(),
                    volumes = projection.volumes.len(),
                    "Storage projection ready"
                );
                Ok(())
            }
            Err(e) if e.is_not_configured() => {
                Err(PermanentError::new(REASON_STORAGE_NOT_CONFIGURED, e.to_string()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_resources(
        &self,
        registry: &mut ImageRegistry,
        proxy: &ProxySettings,
    ) -> Result<(), ReconcilerError> {
        self.generator
            .remove(registry, &self.listers, proxy)
            .await
            .map_err(Into::into)
    }
}

pub(super) fn log_write_error(operation: &str, err: &ClientError) {
    match err {
        ClientError::Conflict(_) => debug!(operation, "Write conflict, retrying on the next event"),
        _ => error!(operation, error = %err, "Unable to write ImageRegistry"),
    }
}
