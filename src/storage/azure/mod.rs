//! # Azure Storage Driver
//!
//! Provisions a storage account and Blob container for the registry.
//!
//! Two credential modes:
//! - **User-provisioned**: the user secret carries the account key. The driver
//!   only checks that account name and container are configured and never
//!   creates or deletes anything.
//! - **Installer-provisioned**: the cluster-minted service principal is used to
//!   create the account (generating a name when none is configured) and the
//!   `image-registry` container. Both are removed again on `Removed`.

mod client;
pub mod shared_key;

pub use client::{AzureApi, AzureClientConfig, AzureError, RestAzureClient, ServicePrincipal};

use crate::controller::conditions::{self, STORAGE_EXISTS};
use crate::crd::{AzureStorageConfig, ConditionStatus, ImageRegistry, StorageSpec};
use crate::storage::{
    env, is_storage_managed, mirror_spec, mirror_status, naming, secret_env, secrets,
    status_mut, StorageContext, StorageError,
};
use k8s_openapi::api::core::v1::EnvVar;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Secret key carrying the storage account key
pub const ACCOUNT_KEY_ENV: &str = "REGISTRY_STORAGE_AZURE_ACCOUNTKEY";
/// Container created when none is configured
pub const DEFAULT_CONTAINER: &str = "image-registry";

const CLOUD_SUBSCRIPTION_ID: &str = "azure_subscription_id";
const CLOUD_CLIENT_ID: &str = "azure_client_id";
const CLOUD_CLIENT_SECRET: &str = "azure_client_secret";
const CLOUD_TENANT_ID: &str = "azure_tenant_id";
const CLOUD_RESOURCE_GROUP: &str = "azure_resourcegroup";
const CLOUD_REGION: &str = "azure_region";

const REASON_NOT_CONFIGURED: &str = "StorageNotConfigured";
const REASON_CONFIG_ERROR: &str = "ConfigError";
const REASON_USER_MANAGED: &str = "UserManaged";
const REASON_AZURE_ERROR: &str = "AzureError";
const REASON_CONTAINER_NOT_FOUND: &str = "ContainerNotFound";
const REASON_CONTAINER_EXISTS: &str = "ContainerExists";
const REASON_CONTAINER_DELETED: &str = "ContainerDeleted";
const REASON_ACCOUNT_DELETED: &str = "AccountDeleted";

/// Resolved Azure credentials
enum AzureCredentials {
    /// Account key supplied by the user
    AccountKey(Zeroizing<String>),
    /// Cluster-minted service principal
    ServicePrincipal {
        principal: ServicePrincipal,
        resource_group: String,
        region: String,
    },
}

/// Driver for Azure Blob storage
pub struct AzureDriver {
    config: AzureStorageConfig,
    ctx: StorageContext,
    client: OnceCell<Arc<dyn AzureApi>>,
}

impl std::fmt::Debug for AzureDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureDriver")
            .field("account_name", &self.config.account_name)
            .field("container", &self.config.container)
            .finish_non_exhaustive()
    }
}

impl AzureDriver {
    #[must_use]
    pub fn new(config: &AzureStorageConfig, ctx: StorageContext) -> Self {
        Self {
            config: config.clone(),
            ctx,
            client: OnceCell::new(),
        }
    }

    /// Configuration as currently converged by this driver
    #[must_use]
    pub fn config(&self) -> &AzureStorageConfig {
        &self.config
    }

    fn credentials(&self) -> Result<AzureCredentials, StorageError> {
        if let Some(user) = secrets::user_secret(&self.ctx.listers) {
            if user.contains(ACCOUNT_KEY_ENV) {
                let key = user.get(ACCOUNT_KEY_ENV).ok_or_else(|| {
                    StorageError::Config(format!(
                        "the secret {}/{} has an empty value for {ACCOUNT_KEY_ENV}; the secret should be removed so that the operator can use cluster-wide secrets or it should contain a valid storage account access key",
                        self.ctx.listers.namespace(),
                        user.name()
                    ))
                })?;
                return Ok(AzureCredentials::AccountKey(Zeroizing::new(key.to_string())));
            }
        }

        let cloud = secrets::cloud_credentials(&self.ctx.listers)?;
        let resource_group = match cloud.get(CLOUD_RESOURCE_GROUP) {
            Some(group) => group.to_string(),
            None => self
                .ctx
                .listers
                .infrastructure()
                .map(|infra| infra.azure_resource_group().to_string())
                .filter(|group| !group.is_empty())
                .ok_or_else(|| {
                    StorageError::Config(format!(
                        "secret {} is missing a value for {CLOUD_RESOURCE_GROUP}",
                        cloud.name()
                    ))
                })?,
        };
        Ok(AzureCredentials::ServicePrincipal {
            principal: ServicePrincipal {
                subscription_id: cloud.require(CLOUD_SUBSCRIPTION_ID)?.to_string(),
                tenant_id: cloud.require(CLOUD_TENANT_ID)?.to_string(),
                client_id: cloud.require(CLOUD_CLIENT_ID)?.to_string(),
                client_secret: cloud.require(CLOUD_CLIENT_SECRET)?,
            },
            resource_group,
            region: cloud.get(CLOUD_REGION).unwrap_or_default().to_string(),
        })
    }

    async fn client(&self, credentials: &AzureCredentials) -> Result<Arc<dyn AzureApi>, StorageError> {
        let service_principal = match credentials {
            AzureCredentials::AccountKey(_) => None,
            AzureCredentials::ServicePrincipal { principal, .. } => Some(principal.clone()),
        };
        self.client
            .get_or_try_init(|| {
                self.ctx.backends.azure(AzureClientConfig {
                    service_principal,
                    proxy: self.ctx.proxy.clone(),
                    provision_timeout: self.ctx.settings.azure_provision_timeout,
                })
            })
            .await
            .map(Arc::clone)
    }

    /// The user's key, or the account's primary key looked up with the service principal
    async fn account_key(
        &self,
        client: &dyn AzureApi,
        credentials: &AzureCredentials,
    ) -> Result<Zeroizing<String>, StorageError> {
        match credentials {
            AzureCredentials::AccountKey(key) => Ok(key.clone()),
            AzureCredentials::ServicePrincipal { resource_group, .. } => Ok(client
                .primary_key(resource_group, &self.config.account_name)
                .await?),
        }
    }

    #[must_use]
    pub fn config_environment(&self) -> Vec<EnvVar> {
        vec![
            env("REGISTRY_STORAGE", "azure"),
            env("REGISTRY_STORAGE_AZURE_CONTAINER", self.config.container.clone()),
            env("REGISTRY_STORAGE_AZURE_ACCOUNTNAME", self.config.account_name.clone()),
            secret_env(ACCOUNT_KEY_ENV),
        ]
    }

    /// Account key for the private configuration secret
    ///
    /// # Errors
    /// Returns an error when credentials are missing or the key lookup fails
    pub async fn fetch_secrets(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let credentials = self.credentials()?;
        let client = self.client(&credentials).await?;
        let key = self.account_key(client.as_ref(), &credentials).await?;
        Ok(BTreeMap::from([(ACCOUNT_KEY_ENV.to_string(), key.to_string())]))
    }

    /// Check that the configured container exists
    ///
    /// # Errors
    /// Returns an error for failures other than a missing container
    pub async fn storage_exists(&self, registry: &mut ImageRegistry) -> Result<bool, StorageError> {
        if self.config.account_name.is_empty() || self.config.container.is_empty() {
            set(registry, ConditionStatus::False, REASON_NOT_CONFIGURED, "Storage is not configured");
            return Ok(false);
        }

        let credentials = match self.credentials() {
            Ok(credentials) => credentials,
            Err(e) => {
                set(
                    registry,
                    ConditionStatus::Unknown,
                    REASON_CONFIG_ERROR,
                    &format!("Unable to get configuration: {e}"),
                );
                return Err(e);
            }
        };
        let client = match self.client(&credentials).await {
            Ok(client) => client,
            Err(e) => {
                set(
                    registry,
                    ConditionStatus::Unknown,
                    REASON_AZURE_ERROR,
                    &format!("Unable to get accounts client: {e}"),
                );
                return Err(e);
            }
        };
        let key = match self.account_key(client.as_ref(), &credentials).await {
            Ok(key) => key,
            Err(e) => {
                set(
                    registry,
                    ConditionStatus::Unknown,
                    REASON_AZURE_ERROR,
                    &format!("Unable to get account primary keys: {e}"),
                );
                return Err(e);
            }
        };

        match client
            .container_exists(&self.config.account_name, &key, &self.config.container)
            .await
        {
            Ok(true) => {
                set(registry, ConditionStatus::True, REASON_CONTAINER_EXISTS, "Storage container exists");
                Ok(true)
            }
            Ok(false) => {
                set(
                    registry,
                    ConditionStatus::False,
                    REASON_CONTAINER_NOT_FOUND,
                    "Container does not exist",
                );
                Ok(false)
            }
            Err(e) => {
                set(
                    registry,
                    ConditionStatus::Unknown,
                    REASON_AZURE_ERROR,
                    &format!("Unable to get the storage container: {e}"),
                );
                Err(e.into())
            }
        }
    }

    /// Converge the storage account and container
    ///
    /// # Errors
    /// Returns an error when Azure rejects a call or every generated name is taken
    pub async fn create_storage(&mut self, registry: &mut ImageRegistry) -> Result<(), StorageError> {
        let credentials = match self.credentials() {
            Ok(credentials) => credentials,
            Err(e) => {
                set(
                    registry,
                    ConditionStatus::Unknown,
                    REASON_CONFIG_ERROR,
                    &format!("Unable to get configuration: {e}"),
                );
                return Err(e);
            }
        };

        match &credentials {
            AzureCredentials::AccountKey(_) => {
                self.adopt_user_storage(registry);
                Ok(())
            }
            AzureCredentials::ServicePrincipal {
                resource_group,
                region,
                ..
            } => {
                let client = match self.client(&credentials).await {
                    Ok(client) => client,
                    Err(e) => {
                        set(
                            registry,
                            ConditionStatus::Unknown,
                            REASON_AZURE_ERROR,
                            &format!("Unable to get accounts client: {e}"),
                        );
                        return Err(e);
                    }
                };
                self.provision(client.as_ref(), registry, resource_group, region)
                    .await
            }
        }
    }

    fn adopt_user_storage(&self, registry: &mut ImageRegistry) {
        if self.config.account_name.is_empty() {
            set(
                registry,
                ConditionStatus::False,
                REASON_NOT_CONFIGURED,
                "Storage account key is provided, but account name is not specified",
            );
            return;
        }
        if self.config.container.is_empty() {
            set(
                registry,
                ConditionStatus::False,
                REASON_NOT_CONFIGURED,
                "Storage account is provided, but container is not specified",
            );
            return;
        }
        status_mut(registry).storage_managed = false;
        mirror_status(registry, StorageSpec::Azure(self.config.clone()));
        set(registry, ConditionStatus::True, REASON_USER_MANAGED, "Storage is managed by the user");
    }

    async fn provision(
        &mut self,
        client: &dyn AzureApi,
        registry: &mut ImageRegistry,
        resource_group: &str,
        region: &str,
    ) -> Result<(), StorageError> {
        if self.config.account_name.is_empty() {
            self.create_generated_account(client, registry, resource_group, region)
                .await?;
        } else {
            self.ensure_account(client, registry, resource_group, region)
                .await?;
        }

        if self.config.container.is_empty() {
            let key = match client
                .primary_key(resource_group, &self.config.account_name)
                .await
            {
                Ok(key) => key,
                Err(e) => {
                    set(
                        registry,
                        ConditionStatus::False,
                        REASON_AZURE_ERROR,
                        &format!("Unable to get account primary key: {e}"),
                    );
                    return Err(e.into());
                }
            };
            if let Err(e) = client
                .create_container(&self.config.account_name, &key, DEFAULT_CONTAINER)
                .await
            {
                set(
                    registry,
                    ConditionStatus::Unknown,
                    REASON_AZURE_ERROR,
                    &format!("Unable to create storage container: {e}"),
                );
                return Err(e.into());
            }
            info!(account = %self.config.account_name, container = DEFAULT_CONTAINER, "✅ Created storage container");
            self.config.container = DEFAULT_CONTAINER.to_string();
            status_mut(registry).storage_managed = true;
            mirror_status(registry, StorageSpec::Azure(self.config.clone()));
            mirror_spec(registry, StorageSpec::Azure(self.config.clone()));
        }

        set(registry, ConditionStatus::True, REASON_CONTAINER_EXISTS, "Storage container exists");
        Ok(())
    }

    /// Create the configured account unless it can already be reached
    async fn ensure_account(
        &self,
        client: &dyn AzureApi,
        registry: &mut ImageRegistry,
        resource_group: &str,
        region: &str,
    ) -> Result<(), StorageError> {
        match client
            .primary_key(resource_group, &self.config.account_name)
            .await
        {
            Ok(_) => {}
            Err(AzureError::AccountNotFound(_)) => {
                if let Err(e) = client
                    .create_storage_account(resource_group, &self.config.account_name, region)
                    .await
                {
                    set(
                        registry,
                        ConditionStatus::Unknown,
                        REASON_AZURE_ERROR,
                        &format!("Unable to create storage account: {e}"),
                    );
                    return Err(e.into());
                }
            }
            Err(e) => {
                set(
                    registry,
                    ConditionStatus::Unknown,
                    REASON_AZURE_ERROR,
                    &format!("Unable to get account primary key: {e}"),
                );
                return Err(e.into());
            }
        }
        mirror_status(registry, StorageSpec::Azure(self.config.clone()));
        Ok(())
    }

    async fn create_generated_account(
        &mut self,
        client: &dyn AzureApi,
        registry: &mut ImageRegistry,
        resource_group: &str,
        region: &str,
    ) -> Result<(), StorageError> {
        let Some(infra) = self.ctx.listers.infrastructure() else {
            set(
                registry,
                ConditionStatus::False,
                REASON_CONFIG_ERROR,
                "Unable to get infrastructure resource",
            );
            return Err(StorageError::Config(
                "infrastructure resource not found".to_string(),
            ));
        };

        let attempts = self.ctx.settings.account_name_attempts;
        let mut last_error = None;
        for _ in 0..attempts {
            let account_name = naming::generate_account_name(infra.infrastructure_name());
            match client
                .create_storage_account(resource_group, &account_name, region)
                .await
            {
                Ok(()) => {
                    self.config.account_name = account_name;
                    status_mut(registry).storage_managed = true;
                    mirror_status(registry, StorageSpec::Azure(self.config.clone()));
                    mirror_spec(registry, StorageSpec::Azure(self.config.clone()));
                    return Ok(());
                }
                Err(e @ AzureError::NameNotAvailable { .. }) => {
                    warn!(error = %e, "Unable to create storage account");
                    last_error = Some(e);
                }
                Err(e) => {
                    set(
                        registry,
                        ConditionStatus::Unknown,
                        REASON_AZURE_ERROR,
                        &format!("Unable to create storage account: {e}"),
                    );
                    return Err(e.into());
                }
            }
        }

        let last_error = last_error.map_or_else(String::new, |e| e.to_string());
        set(
            registry,
            ConditionStatus::False,
            REASON_AZURE_ERROR,
            &format!("Unable to create storage account: {last_error}"),
        );
        Err(StorageError::NamesExhausted {
            resource: "storage account",
            attempts,
            last_error,
        })
    }

    /// Delete the container and then the account, if the operator created them
    ///
    /// # Errors
    /// Returns an error when a deletion fails
    pub async fn remove_storage(&mut self, registry: &mut ImageRegistry) -> Result<bool, StorageError> {
        if !is_storage_managed(registry) {
            return Ok(false);
        }
        if self.config.account_name.is_empty() {
            set(registry, ConditionStatus::False, REASON_NOT_CONFIGURED, "Storage is not configured");
            return Ok(false);
        }

        let credentials = match self.credentials() {
            Ok(credentials) => credentials,
            Err(e) => {
                set(
                    registry,
                    ConditionStatus::Unknown,
                    REASON_CONFIG_ERROR,
                    &format!("Unable to get configuration: {e}"),
                );
                return Err(e);
            }
        };
        let AzureCredentials::ServicePrincipal { resource_group, .. } = &credentials else {
            // User keys cannot manage accounts; nothing of ours to remove
            return Ok(false);
        };
        let client = match self.client(&credentials).await {
            Ok(client) => client,
            Err(e) => {
                set(
                    registry,
                    ConditionStatus::Unknown,
                    REASON_AZURE_ERROR,
                    &format!("Unable to get accounts client: {e}"),
                );
                return Err(e);
            }
        };

        if !self.config.container.is_empty() {
            let key = match client
                .primary_key(resource_group, &self.config.account_name)
                .await
            {
                Ok(key) => key,
                Err(e @ AzureError::AccountNotFound(_)) => {
                    self.clear(registry, |c| {
                        c.account_name.clear();
                        c.container.clear();
                    });
                    status_mut(registry).storage_managed = false;
                    set(
                        registry,
                        ConditionStatus::False,
                        REASON_CONTAINER_NOT_FOUND,
                        &format!("Container has been already deleted: {e}"),
                    );
                    return Ok(false);
                }
                Err(e) => {
                    set(
                        registry,
                        ConditionStatus::Unknown,
                        REASON_AZURE_ERROR,
                        &format!("Unable to get account primary keys: {e}"),
                    );
                    return Err(e.into());
                }
            };

            match client
                .delete_container(&self.config.account_name, &key, &self.config.container)
                .await
            {
                Ok(()) => {}
                Err(AzureError::ContainerNotFound(container)) => {
                    info!(account = %self.config.account_name, container = %container, "Storage container is already gone");
                }
                Err(e) => {
                    set(
                        registry,
                        ConditionStatus::Unknown,
                        REASON_AZURE_ERROR,
                        &format!("Unable to delete storage container: {e}"),
                    );
                    return Err(e.into());
                }
            }
            self.clear(registry, |c| c.container.clear());
            set(
                registry,
                ConditionStatus::False,
                REASON_CONTAINER_DELETED,
                "Storage container has been deleted",
            );
        }

        match client
            .delete_storage_account(resource_group, &self.config.account_name)
            .await
        {
            Ok(()) => {}
            Err(AzureError::AccountNotFound(account)) => {
                info!(account = %account, "Storage account is already gone");
            }
            Err(e) => {
                set(
                    registry,
                    ConditionStatus::False,
                    REASON_AZURE_ERROR,
                    &format!("Unable to delete storage account: {e}"),
                );
                return Err(e.into());
            }
        }
        self.clear(registry, |c| c.account_name.clear());
        status_mut(registry).storage_managed = false;
        set(
            registry,
            ConditionStatus::False,
            REASON_ACCOUNT_DELETED,
            "Storage account has been deleted",
        );
        Ok(false)
    }

    /// Apply `clear` to the driver config and to the Azure arm of spec and status
    fn clear(&mut self, registry: &mut ImageRegistry, clear: impl Fn(&mut AzureStorageConfig)) {
        clear(&mut self.config);
        if let Some(StorageSpec::Azure(spec)) = registry.spec.storage.as_mut() {
            clear(spec);
        }
        if let Some(StorageSpec::Azure(status)) = status_mut(registry).storage.as_mut() {
            clear(status);
        }
    }
}

fn set(registry: &mut ImageRegistry, status: ConditionStatus, reason: &str, message: &str) {
    conditions::set_condition(registry, STORAGE_EXISTS, status, reason, message);
}
