//! # Finalization
//!
//! Storage teardown for an `ImageRegistry` being deleted, followed by release of
//! the operator's finalizer.

use crate::constants::REGISTRY_FINALIZER;
use crate::controller::reconciler::sync::log_write_error;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::crd::ImageRegistry;
use crate::storage::ProxySettings;
use kube::ResourceExt;
use tracing::{debug, info, warn};

/// Add the operator finalizer if missing. Returns `true` when it was added.
pub fn append_finalizer(registry: &mut ImageRegistry) -> bool {
    if has_finalizer(registry) {
        return false;
    }
    registry
        .finalizers_mut()
        .push(REGISTRY_FINALIZER.to_string());
    true
}

/// Remove the operator finalizer. Returns `true` when it was present.
pub fn strip_finalizer(registry: &mut ImageRegistry) -> bool {
    let finalizers = registry.finalizers_mut();
    let before = finalizers.len();
    finalizers.retain(|f| f != REGISTRY_FINALIZER);
    before != finalizers.len()
}

#[must_use]
pub fn has_finalizer(registry: &ImageRegistry) -> bool {
    registry.finalizers().iter().any(|f| f == REGISTRY_FINALIZER)
}

impl Reconciler {
    /// Remove storage and release the finalizer
    ///
    /// Nothing happens when the finalizer is already gone. Storage removal
    /// completes before the finalizer is released, so a failed or pending removal
    /// keeps the object around for the next attempt. Whatever the removal already
    /// cleared from spec and status is written back before the error surfaces.
    ///
    /// # Errors
    /// Returns the removal error or the API error from the final update
    pub async fn finalize(
        &self,
        registry: &mut ImageRegistry,
        proxy: &ProxySettings,
    ) -> Result<(), ReconcilerError> {
        if registry.metadata.deletion_timestamp.is_none() || !has_finalizer(registry) {
            debug!(name = %registry.name_any(), "Nothing to finalize");
            return Ok(());
        }

        info!(name = %registry.name_any(), "Finalizing ImageRegistry");
        let previous = registry.clone();
        if let Err(e) = self.generator.remove(registry, &self.listers, proxy).await {
            warn!(name = %registry.name_any(), error = %e, "Storage removal incomplete");
            // Write failures are logged by persist; the removal error drives the retry
            let _ = self.persist(&previous, registry).await;
            return Err(e.into());
        }

        // The object is gone once the finalizer is released, so status is not written
        strip_finalizer(registry);
        self.client
            .update(registry)
            .await
            .inspect_err(|e| log_write_error("update", e))?;
        info!(name = %registry.name_any(), "Finalizer removed");
        Ok(())
    }
}
