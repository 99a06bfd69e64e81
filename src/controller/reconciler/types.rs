//! # Types
//!
//! Core types for the reconciler.

use crate::controller::cache::Listers;
use crate::controller::client::{ClientError, RegistryClient};
use crate::controller::generator::{Generator, GeneratorError};
use std::sync::Arc;
use thiserror::Error;

/// Reason reported when the resource fails verification
pub const REASON_VERIFICATION_FAILED: &str = "VerificationFailed";
/// Reason reported when no storage is configured
pub const REASON_STORAGE_NOT_CONFIGURED: &str = "StorageNotConfigured";

/// Terminal failure: reported through conditions and never requeued
#[derive(Debug, Error)]
#[error("{reason}: {message}")]
pub struct PermanentError {
    pub reason: &'static str,
    pub message: String,
}

impl PermanentError {
    #[must_use]
    pub fn new(reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Permanent(#[from] PermanentError),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl ReconcilerError {
    /// Permanent errors are dropped from the queue; everything else is retried
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Short label for metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        if self.is_permanent() {
            "permanent"
        } else {
            "transient"
        }
    }
}

/// Everything a sync needs
#[derive(Clone)]
pub struct Reconciler {
    pub listers: Listers,
    pub client: Arc<dyn RegistryClient>,
    pub generator: Arc<Generator>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("listers", &self.listers)
            .field("generator", &self.generator)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(listers: Listers, client: Arc<dyn RegistryClient>, generator: Generator) -> Self {
        Self {
            listers,
            client,
            generator: Arc::new(generator),
        }
    }
}
