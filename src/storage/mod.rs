//! # Storage Drivers
//!
//! One driver per storage backend, selected by matching on the active
//! [`StorageSpec`] arm. Every driver offers the same operations:
//!
//! | Operation | I/O | Purpose |
//! |-----------|-----|---------|
//! | `config_environment` | none | registry environment variables |
//! | `extra_mounts` | none | volumes and mounts the registry needs |
//! | `fetch_secrets` | provider | values for the private configuration secret |
//! | `storage_exists` | provider | live probe, records `StorageExists` |
//! | `storage_changed` | none | desired vs. last converged configuration |
//! | `create_storage` | provider | idempotent convergence |
//! | `remove_storage` | provider | tear down what the operator created |
//!
//! Drivers build their provider client at most once and only on first use.

pub mod azure;
pub mod naming;
pub mod proxy;
pub mod pvc;
pub mod s3;
pub mod secrets;

pub use azure::{AzureApi, AzureClientConfig, AzureDriver, AzureError, RestAzureClient};
pub use proxy::ProxySettings;
pub use pvc::PvcDriver;
pub use s3::{AwsS3Client, S3Api, S3ClientConfig, S3Driver, S3Error};

use crate::constants::{
    AZURE_ACCOUNT_NAME_ATTEMPTS, DEFAULT_AZURE_PROVISION_TIMEOUT_SECS,
    DEFAULT_S3_WAIT_TIMEOUT_SECS, PRIVATE_CONFIGURATION_SECRET, S3_BUCKET_NAME_ATTEMPTS,
};
use crate::controller::cache::Listers;
use crate::crd::{ImageRegistry, ImageRegistryStatus, StorageSpec};
use crate::observability::metrics;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, SecretKeySelector, Volume, VolumeMount};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Errors returned by storage drivers
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No storage arm is set on the resource
    #[error("storage is not configured")]
    NotConfigured,
    /// Credentials or cluster metadata are missing or invalid
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    S3(#[from] S3Error),
    #[error(transparent)]
    Azure(#[from] AzureError),
    /// Every generated name was already taken
    #[error("unable to generate a unique {resource} name after {attempts} attempts: {last_error}")]
    NamesExhausted {
        resource: &'static str,
        attempts: usize,
        last_error: String,
    },
    /// The storage exists but cannot be used
    #[error("{0}")]
    Unusable(String),
}

/// Tunables shared by all drivers
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Attempts at finding a free S3 bucket name
    pub bucket_name_attempts: usize,
    /// Attempts at finding a free Azure storage account name
    pub account_name_attempts: usize,
    /// How long to wait for a bucket to appear or disappear
    pub s3_wait_timeout: Duration,
    /// Interval between bucket existence polls
    pub s3_poll_interval: Duration,
    /// How long to wait for an Azure storage account to provision
    pub azure_provision_timeout: Duration,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            bucket_name_attempts: S3_BUCKET_NAME_ATTEMPTS,
            account_name_attempts: AZURE_ACCOUNT_NAME_ATTEMPTS,
            s3_wait_timeout: Duration::from_secs(DEFAULT_S3_WAIT_TIMEOUT_SECS),
            s3_poll_interval: Duration::from_secs(5),
            azure_provision_timeout: Duration::from_secs(DEFAULT_AZURE_PROVISION_TIMEOUT_SECS),
        }
    }
}

/// Builds provider clients for the drivers
///
/// Production uses [`CloudBackends`]; tests substitute in-memory fakes.
#[async_trait]
pub trait StorageBackends: Send + Sync {
    async fn s3(&self, config: S3ClientConfig) -> Result<Arc<dyn S3Api>, StorageError>;
    async fn azure(&self, config: AzureClientConfig) -> Result<Arc<dyn AzureApi>, StorageError>;
}

/// Real AWS SDK and Azure REST clients
#[derive(Debug, Default, Clone, Copy)]
pub struct CloudBackends;

#[async_trait]
impl StorageBackends for CloudBackends {
    async fn s3(&self, config: S3ClientConfig) -> Result<Arc<dyn S3Api>, StorageError> {
        Ok(Arc::new(AwsS3Client::new(config).await?))
    }

    async fn azure(&self, config: AzureClientConfig) -> Result<Arc<dyn AzureApi>, StorageError> {
        Ok(Arc::new(RestAzureClient::new(config)?))
    }
}

/// What a driver needs from the rest of the operator for one sync
#[derive(Clone)]
pub struct StorageContext {
    pub listers: Listers,
    pub proxy: ProxySettings,
    pub backends: Arc<dyn StorageBackends>,
    pub settings: StorageSettings,
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("listers", &self.listers)
            .field("proxy", &self.proxy)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Storage driver for the configured backend
#[derive(Debug)]
pub enum StorageDriver {
    S3(S3Driver),
    Azure(AzureDriver),
    Pvc(PvcDriver),
}

impl StorageDriver {
    /// Driver for the given storage configuration
    #[must_use]
    pub fn new(spec: &StorageSpec, ctx: StorageContext) -> Self {
        match spec {
            StorageSpec::S3(config) => Self::S3(S3Driver::new(config, ctx)),
            StorageSpec::Azure(config) => Self::Azure(AzureDriver::new(config, ctx)),
            StorageSpec::Pvc(config) => Self::Pvc(PvcDriver::new(config, ctx)),
        }
    }

    /// Driver for the registry's desired storage
    ///
    /// # Errors
    /// Returns [`StorageError::NotConfigured`] when the spec has no storage
    pub fn for_registry(
        registry: &ImageRegistry,
        ctx: StorageContext,
    ) -> Result<Self, StorageError> {
        registry
            .spec
            .storage
            .as_ref()
            .map(|spec| Self::new(spec, ctx))
            .ok_or(StorageError::NotConfigured)
    }

    /// Provider label for logs and metrics
    #[must_use]
    pub fn provider(&self) -> &'static str {
        match self {
            Self::S3(_) => "s3",
            Self::Azure(_) => "azure",
            Self::Pvc(_) => "pvc",
        }
    }

    /// Environment variables that point the registry at this storage
    #[must_use]
    pub fn config_environment(&self) -> Vec<EnvVar> {
        match self {
            Self::S3(d) => d.config_environment(),
            Self::Azure(d) => d.config_environment(),
            Self::Pvc(d) => d.config_environment(),
        }
    }

    /// Extra volumes and mounts the registry needs for this storage
    #[must_use]
    pub fn extra_mounts(&self) -> (Vec<Volume>, Vec<VolumeMount>) {
        match self {
            Self::S3(d) => d.extra_mounts(),
            Self::Azure(_) => (Vec::new(), Vec::new()),
            Self::Pvc(d) => d.extra_mounts(),
        }
    }

    /// Values for the private configuration secret
    ///
    /// # Errors
    /// Returns an error when credentials cannot be resolved
    pub async fn fetch_secrets(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let started = Instant::now();
        let result = match self {
            Self::S3(d) => d.fetch_secrets(),
            Self::Azure(d) => d.fetch_secrets().await,
            Self::Pvc(_) => Ok(BTreeMap::new()),
        };
        metrics::observe_storage_operation(self.provider(), "fetch_secrets", started, result.is_ok());
        result
    }

    /// Probe the backend and record `StorageExists`
    ///
    /// `Ok(false)` covers both "not configured" and "not found".
    ///
    /// # Errors
    /// Returns an error only for unexpected provider failures
    pub async fn storage_exists(&self, registry: &mut ImageRegistry) -> Result<bool, StorageError> {
        let started = Instant::now();
        let result = match self {
            Self::S3(d) => d.storage_exists(registry).await,
            Self::Azure(d) => d.storage_exists(registry).await,
            Self::Pvc(d) => Ok(d.storage_exists(registry)),
        };
        metrics::observe_storage_operation(self.provider(), "storage_exists", started, result.is_ok());
        result
    }

    /// Whether the desired storage differs from the last converged storage
    #[must_use]
    pub fn storage_changed(&self, registry: &ImageRegistry) -> bool {
        storage_changed(registry)
    }

    /// Converge the backend to the desired storage
    ///
    /// # Errors
    /// Returns an error when the storage could not be created or reached
    pub async fn create_storage(&mut self, registry: &mut ImageRegistry) -> Result<(), StorageError> {
        let started = Instant::now();
        let provider = self.provider();
        let result = match self {
            Self::S3(d) => d.create_storage(registry).await,
            Self::Azure(d) => d.create_storage(registry).await,
            Self::Pvc(d) => d.create_storage(registry),
        };
        metrics::observe_storage_operation(provider, "create_storage", started, result.is_ok());
        result
    }

    /// Remove storage the operator created. `Ok(true)` asks the caller to retry later.
    ///
    /// # Errors
    /// Returns an error when a deletion failed
    pub async fn remove_storage(&mut self, registry: &mut ImageRegistry) -> Result<bool, StorageError> {
        let started = Instant::now();
        let provider = self.provider();
        let result = match self {
            Self::S3(d) => d.remove_storage(registry).await,
            Self::Azure(d) => d.remove_storage(registry).await,
            Self::Pvc(_) => Ok(false),
        };
        metrics::observe_storage_operation(provider, "remove_storage", started, result.is_ok());
        result
    }
}

/// Structural inequality of desired and last converged storage
#[must_use]
pub fn storage_changed(registry: &ImageRegistry) -> bool {
    let converged = registry.status.as_ref().and_then(|s| s.storage.as_ref());
    converged != registry.spec.storage.as_ref()
}

pub(crate) fn status_mut(registry: &mut ImageRegistry) -> &mut ImageRegistryStatus {
    registry
        .status
        .get_or_insert_with(ImageRegistryStatus::default)
}

pub(crate) fn is_storage_managed(registry: &ImageRegistry) -> bool {
    registry.status.as_ref().is_some_and(|s| s.storage_managed)
}

/// Record `storage` as the last converged configuration
pub(crate) fn mirror_status(registry: &mut ImageRegistry, storage: StorageSpec) {
    let status = status_mut(registry);
    if status.storage.as_ref() != Some(&storage) {
        status.storage = Some(storage);
    }
}

/// Write operator-chosen values back into the desired configuration
pub(crate) fn mirror_spec(registry: &mut ImageRegistry, storage: StorageSpec) {
    if registry.spec.storage.as_ref() != Some(&storage) {
        registry.spec.storage = Some(storage);
    }
}

pub(crate) fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        value_from: None,
    }
}

/// Variable read from the private configuration secret under the same key
pub(crate) fn secret_env(name: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: PRIVATE_CONFIGURATION_SECRET.to_string(),
                key: name.to_string(),
                ..SecretKeySelector::default()
            }),
            ..EnvVarSource::default()
        }),
    }
}
