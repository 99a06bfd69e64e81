//! # S3 Storage Driver
//!
//! Provisions and hardens an S3 bucket for the registry.
//!
//! ## Create
//!
//! 1. A configured bucket that answers `HeadBucket` is used as is.
//! 2. Otherwise a bucket is created, generating a name from the region and
//!    infrastructure name when none is configured. A generated name that is
//!    already taken is regenerated, up to the configured attempt bound; a
//!    user-supplied name that is taken is reported and left alone.
//! 3. Buckets the operator owns are hardened: public access blocked, ownership
//!    tag, default encryption, cleanup of abandoned multipart uploads. Each step
//!    records its own condition and a failure does not stop the others.
//!
//! ## Remove
//!
//! Only buckets the operator created are deleted. A bucket that is already gone
//! counts as deleted.

mod client;

pub use client::{
    AwsS3Client, BucketEncryption, S3Api, S3ClientConfig, S3Credentials, S3Error,
    BUCKET_ALREADY_EXISTS, FORBIDDEN, NOT_FOUND, NO_SUCH_BUCKET,
};

use crate::controller::conditions::{
    self, STORAGE_ENCRYPTED, STORAGE_EXISTS, STORAGE_INCOMPLETE_UPLOAD_CLEANUP_ENABLED,
    STORAGE_PUBLIC_ACCESS_BLOCKED, STORAGE_TAGGED,
};
use crate::crd::{ConditionStatus, ImageRegistry, S3StorageConfig, StorageSpec};
use crate::storage::{
    env, is_storage_managed, mirror_spec, mirror_status, naming, secret_env, secrets,
    status_mut, StorageContext, StorageError,
};
use k8s_openapi::api::core::v1::{EnvVar, KeyToPath, SecretVolumeSource, Volume, VolumeMount};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn, Instrument};

/// Secret keys for S3 credentials in the user and private configuration secrets
pub const ACCESS_KEY_ENV: &str = "REGISTRY_STORAGE_S3_ACCESSKEY";
pub const SECRET_KEY_ENV: &str = "REGISTRY_STORAGE_S3_SECRETKEY";
/// Keys in the cluster-minted credentials secret
pub const CLOUD_ACCESS_KEY_ID: &str = "aws_access_key_id";
pub const CLOUD_SECRET_ACCESS_KEY: &str = "aws_secret_access_key";

/// Lifecycle rule aborting abandoned multipart uploads
pub const INCOMPLETE_UPLOAD_RULE_ID: &str = "cleanup-incomplete-multipart-registry-uploads";
/// Days before an incomplete multipart upload is aborted
pub const INCOMPLETE_UPLOAD_RETENTION_DAYS: i32 = 1;

const CLOUDFRONT_VOLUME: &str = "registry-cloudfront";
const CLOUDFRONT_MOUNT_PATH: &str = "/etc/docker/cloudfront";
const CLOUDFRONT_KEY_FILE: &str = "private.pem";

const NOT_CONFIGURED_REASON: &str = "StorageNotConfigured";
const CONFIG_ERROR_REASON: &str = "ConfigError";
const UNKNOWN_ERROR_REASON: &str = "Unknown Error Occurred";

/// Driver for S3 buckets
pub struct S3Driver {
    config: S3StorageConfig,
    ctx: StorageContext,
    client: OnceCell<Arc<dyn S3Api>>,
}

impl std::fmt::Debug for S3Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Driver")
            .field("bucket", &self.config.bucket)
            .field("region", &self.config.region)
            .field("client_ready", &self.client.initialized())
            .finish_non_exhaustive()
    }
}

impl S3Driver {
    /// Create a driver. An empty region defaults to the cluster's AWS region.
    #[must_use]
    pub fn new(config: &S3StorageConfig, ctx: StorageContext) -> Self {
        let mut config = config.clone();
        if config.region.is_empty() {
            if let Some(infra) = ctx.listers.infrastructure() {
                config.region = infra.aws_region().to_string();
            }
        }
        Self {
            config,
            ctx,
            client: OnceCell::new(),
        }
    }

    /// Configuration as currently converged by this driver
    #[must_use]
    pub fn config(&self) -> &S3StorageConfig {
        &self.config
    }

    /// Access keys: the user secret wins over the cluster-minted credentials
    fn credentials(&self) -> Result<S3Credentials, StorageError> {
        if let Some(user) = secrets::user_secret(&self.ctx.listers) {
            if user.contains(ACCESS_KEY_ENV) || user.contains(SECRET_KEY_ENV) {
                return Ok(S3Credentials {
                    access_key: user.require(ACCESS_KEY_ENV)?,
                    secret_key: user.require(SECRET_KEY_ENV)?,
                });
            }
        }
        let cloud = secrets::cloud_credentials(&self.ctx.listers)?;
        Ok(S3Credentials {
            access_key: cloud.require(CLOUD_ACCESS_KEY_ID)?,
            secret_key: cloud.require(CLOUD_SECRET_ACCESS_KEY)?,
        })
    }

    async fn client(&self) -> Result<Arc<dyn S3Api>, StorageError> {
        self.client
            .get_or_try_init(|| async {
                let credentials = self.credentials()?;
                self.ctx
                    .backends
                    .s3(S3ClientConfig {
                        region: self.config.region.clone(),
                        region_endpoint: (!self.config.region_endpoint.is_empty())
                            .then(|| self.config.region_endpoint.clone()),
                        credentials,
                        proxy: self.ctx.proxy.clone(),
                    })
                    .await
            })
            .await
            .map(Arc::clone)
    }

    #[must_use]
    pub fn config_environment(&self) -> Vec<EnvVar> {
        let mut envs = Vec::new();
        if !self.config.region_endpoint.is_empty() {
            envs.push(env(
                "REGISTRY_STORAGE_S3_REGIONENDPOINT",
                self.config.region_endpoint.clone(),
            ));
        }
        if !self.config.key_id.is_empty() {
            envs.push(env("REGISTRY_STORAGE_S3_KEYID", self.config.key_id.clone()));
        }
        envs.extend([
            env("REGISTRY_STORAGE", "s3"),
            env("REGISTRY_STORAGE_S3_BUCKET", self.config.bucket.clone()),
            env("REGISTRY_STORAGE_S3_REGION", self.config.region.clone()),
            env("REGISTRY_STORAGE_S3_ENCRYPT", self.config.encrypt.to_string()),
            secret_env(ACCESS_KEY_ENV),
            secret_env(SECRET_KEY_ENV),
        ]);
        if let Some(cloud_front) = &self.config.cloud_front {
            envs.extend([
                env("REGISTRY_MIDDLEWARE_STORAGE_CLOUDFRONT_BASEURL", cloud_front.base_url.clone()),
                env(
                    "REGISTRY_MIDDLEWARE_STORAGE_CLOUDFRONT_KEYPAIRID",
                    cloud_front.keypair_id.clone(),
                ),
                env(
                    "REGISTRY_MIDDLEWARE_STORAGE_CLOUDFRONT_DURATION",
                    cloud_front.duration.clone(),
                ),
                env(
                    "REGISTRY_MIDDLEWARE_STORAGE_CLOUDFRONT_PRIVATEKEY",
                    format!("{CLOUDFRONT_MOUNT_PATH}/{CLOUDFRONT_KEY_FILE}"),
                ),
            ]);
        }
        envs
    }

    /// CloudFront private key mount, when CloudFront is configured
    #[must_use]
    pub fn extra_mounts(&self) -> (Vec<Volume>, Vec<VolumeMount>) {
        let Some(cloud_front) = &self.config.cloud_front else {
            return (Vec::new(), Vec::new());
        };
        let volume = Volume {
            name: CLOUDFRONT_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(cloud_front.private_key.name.clone()),
                items: Some(vec![KeyToPath {
                    key: cloud_front.private_key.key.clone(),
                    path: CLOUDFRONT_KEY_FILE.to_string(),
                    mode: None,
                }]),
                optional: Some(false),
                ..SecretVolumeSource::default()
            }),
            ..Volume::default()
        };
        let mount = VolumeMount {
            name: CLOUDFRONT_VOLUME.to_string(),
            mount_path: CLOUDFRONT_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        };
        (vec![volume], vec![mount])
    }

    /// Access keys for the private configuration secret
    ///
    /// # Errors
    /// Returns an error when no usable credentials exist
    pub fn fetch_secrets(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let credentials = self.credentials()?;
        Ok(BTreeMap::from([
            (ACCESS_KEY_ENV.to_string(), credentials.access_key.to_string()),
            (SECRET_KEY_ENV.to_string(), credentials.secret_key.to_string()),
        ]))
    }

    /// Check the configured bucket
    ///
    /// # Errors
    /// Returns an error for failures other than a missing bucket
    pub async fn storage_exists(&self, registry: &mut ImageRegistry) -> Result<bool, StorageError> {
        if self.config.bucket.is_empty() {
            conditions::set_condition(
                registry,
                STORAGE_EXISTS,
                ConditionStatus::False,
                NOT_CONFIGURED_REASON,
                "Storage is not configured",
            );
            return Ok(false);
        }

        let client = match self.client().await {
            Ok(client) => client,
            Err(e) => {
                conditions::set_condition(
                    registry,
                    STORAGE_EXISTS,
                    ConditionStatus::Unknown,
                    CONFIG_ERROR_REASON,
                    &format!("Unable to get configuration: {e}"),
                );
                return Err(e);
            }
        };

        match client.head_bucket(&self.config.bucket).await {
            Ok(()) => {
                conditions::set_condition(
                    registry,
                    STORAGE_EXISTS,
                    ConditionStatus::True,
                    "S3 Bucket Exists",
                    "S3 bucket exists",
                );
                Ok(true)
            }
            Err(e) if e.is_missing_bucket() => {
                conditions::set_condition(
                    registry,
                    STORAGE_EXISTS,
                    ConditionStatus::False,
                    e.reason(),
                    &e.to_string(),
                );
                Ok(false)
            }
            Err(e) => {
                conditions::set_condition(
                    registry,
                    STORAGE_EXISTS,
                    ConditionStatus::Unknown,
                    e.reason(),
                    &e.to_string(),
                );
                Err(e.into())
            }
        }
    }

    /// Converge the bucket. See the module docs for the algorithm.
    ///
    /// # Errors
    /// Returns an error when the bucket cannot be created, reached or named
    pub async fn create_storage(&mut self, registry: &mut ImageRegistry) -> Result<(), StorageError> {
        let client = match self.client().await {
            Ok(client) => client,
            Err(e) => {
                conditions::set_condition(
                    registry,
                    STORAGE_EXISTS,
                    ConditionStatus::Unknown,
                    CONFIG_ERROR_REASON,
                    &format!("Unable to get configuration: {e}"),
                );
                return Err(e);
            }
        };
        let Some(infra) = self.ctx.listers.infrastructure() else {
            conditions::set_condition(
                registry,
                STORAGE_EXISTS,
                ConditionStatus::False,
                CONFIG_ERROR_REASON,
                "Unable to get infrastructure resource",
            );
            return Err(StorageError::Config(
                "infrastructure resource not found".to_string(),
            ));
        };
        let infra_name = infra.infrastructure_name().to_string();
        let mut config = self.config.clone();

        let bucket_exists = if config.bucket.is_empty() {
            false
        } else {
            match client.head_bucket(&config.bucket).await {
                Ok(()) => true,
                Err(e) if e.is_missing_bucket() => {
                    // We will try to create it
                    conditions::set_condition(
                        registry,
                        STORAGE_EXISTS,
                        ConditionStatus::False,
                        e.reason(),
                        &e.to_string(),
                    );
                    false
                }
                Err(e) => {
                    conditions::set_condition(
                        registry,
                        STORAGE_EXISTS,
                        ConditionStatus::Unknown,
                        UNKNOWN_ERROR_REASON,
                        &e.to_string(),
                    );
                    return Err(e.into());
                }
            }
        };

        if bucket_exists {
            mirror_status(registry, StorageSpec::S3(config.clone()));
            conditions::set_condition(
                registry,
                STORAGE_EXISTS,
                ConditionStatus::True,
                "S3 Bucket Exists",
                "User supplied S3 bucket exists and is accessible",
            );
        } else {
            self.create_bucket(client.as_ref(), registry, &mut config, &infra_name)
                .await?;
        }

        if let Err(e) = self.wait_for_bucket(client.as_ref(), &config.bucket, true).await {
            conditions::set_condition(
                registry,
                STORAGE_EXISTS,
                ConditionStatus::False,
                e.reason(),
                &e.to_string(),
            );
            return Err(e.into());
        }

        if is_storage_managed(registry) {
            harden_bucket(client.as_ref(), registry, &mut config, &infra_name).await;
        } else {
            mirror_status(registry, StorageSpec::S3(config.clone()));
        }

        self.config = config;
        Ok(())
    }

    async fn create_bucket(
        &self,
        client: &dyn S3Api,
        registry: &mut ImageRegistry,
        config: &mut S3StorageConfig,
        infra_name: &str,
    ) -> Result<(), StorageError> {
        let user_supplied = !config.bucket.is_empty();
        let attempts = self.ctx.settings.bucket_name_attempts;
        let mut last_error = None;

        for attempt in 1..=attempts {
            if config.bucket.is_empty() {
                config.bucket = naming::generate_bucket_name(&config.region, infra_name);
            }
            let span = tracing::info_span!("storage.s3.create_bucket", bucket = %config.bucket, attempt);
            match client.create_bucket(&config.bucket).instrument(span).await {
                Ok(()) => {
                    info!(bucket = %config.bucket, "✅ Created S3 bucket");
                    status_mut(registry).storage_managed = true;
                    mirror_status(registry, StorageSpec::S3(config.clone()));
                    mirror_spec(registry, StorageSpec::S3(config.clone()));
                    conditions::set_condition(
                        registry,
                        STORAGE_EXISTS,
                        ConditionStatus::True,
                        "Creation Successful",
                        "S3 bucket was successfully created",
                    );
                    return Ok(());
                }
                Err(e) if e.code() == Some(BUCKET_ALREADY_EXISTS) => {
                    if user_supplied {
                        conditions::set_condition(
                            registry,
                            STORAGE_EXISTS,
                            ConditionStatus::False,
                            "Unable to Access Bucket",
                            "The bucket exists, but we do not have permission to access it",
                        );
                        return Err(StorageError::Unusable(format!(
                            "bucket {} exists but is not accessible",
                            config.bucket
                        )));
                    }
                    debug!(bucket = %config.bucket, attempt, "Bucket name taken, regenerating");
                    config.bucket.clear();
                    last_error = Some(e);
                }
                Err(e) => {
                    conditions::set_condition(
                        registry,
                        STORAGE_EXISTS,
                        ConditionStatus::False,
                        e.reason(),
                        &e.to_string(),
                    );
                    return Err(e.into());
                }
            }
        }

        warn!(attempts, "Unable to find a free S3 bucket name");
        conditions::set_condition(
            registry,
            STORAGE_EXISTS,
            ConditionStatus::False,
            "Unable to Generate Unique Bucket Name",
            "",
        );
        Err(StorageError::NamesExhausted {
            resource: "S3 bucket",
            attempts,
            last_error: last_error.map_or_else(String::new, |e| e.to_string()),
        })
    }

    /// Poll until the bucket exists (or no longer exists)
    async fn wait_for_bucket(
        &self,
        client: &dyn S3Api,
        bucket: &str,
        exists: bool,
    ) -> Result<(), S3Error> {
        let interval = self.ctx.settings.s3_poll_interval;
        let wait = async {
            loop {
                match client.head_bucket(bucket).await {
                    Ok(()) if exists => return Ok(()),
                    Err(e) if e.is_missing_bucket() && !exists => return Ok(()),
                    Ok(()) => {}
                    Err(e) if e.is_missing_bucket() => {}
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(interval).await;
            }
        };
        let state = if exists { "exist" } else { "not exist" };
        tokio::time::timeout(self.ctx.settings.s3_wait_timeout, wait)
            .await
            .unwrap_or_else(|_| {
                Err(S3Error::service(
                    "ResourceNotReady",
                    format!("timed out waiting for bucket {bucket} to {state}"),
                ))
            })
    }

    /// Delete the bucket if the operator created it. `Ok(true)` means retry later.
    ///
    /// # Errors
    /// Returns an error when S3 rejects the deletion
    pub async fn remove_storage(&mut self, registry: &mut ImageRegistry) -> Result<bool, StorageError> {
        if !is_storage_managed(registry) || self.config.bucket.is_empty() {
            return Ok(false);
        }
        let client = self.client().await?;
        let bucket = self.config.bucket.clone();

        let already_gone = match client.delete_bucket(&bucket).await {
            Ok(()) => false,
            Err(e) if e.code() == Some(NO_SUCH_BUCKET) => true,
            Err(e @ S3Error::Service { .. }) => {
                conditions::set_condition(
                    registry,
                    STORAGE_EXISTS,
                    ConditionStatus::Unknown,
                    e.reason(),
                    &e.to_string(),
                );
                return Err(e.into());
            }
            Err(e) => {
                warn!(bucket = %bucket, error = %e, "Bucket deletion did not reach S3, will retry");
                return Ok(true);
            }
        };

        if !already_gone {
            if let Err(e) = self.wait_for_bucket(client.as_ref(), &bucket, false).await {
                conditions::set_condition(
                    registry,
                    STORAGE_EXISTS,
                    ConditionStatus::True,
                    e.reason(),
                    &e.to_string(),
                );
                return Err(e.into());
            }
        }

        if let Some(StorageSpec::S3(spec)) = registry.spec.storage.as_mut() {
            spec.bucket.clear();
        }
        self.config.bucket.clear();
        mirror_status(registry, StorageSpec::S3(self.config.clone()));
        status_mut(registry).storage_managed = false;

        let message = if already_gone {
            "The S3 bucket did not exist."
        } else {
            "The S3 bucket has been removed."
        };
        conditions::set_condition(
            registry,
            STORAGE_EXISTS,
            ConditionStatus::False,
            "S3 Bucket Deleted",
            message,
        );
        info!(bucket = %bucket, "🗑️ Removed S3 bucket");
        Ok(false)
    }
}

/// Apply baseline hardening to an operator-owned bucket
async fn harden_bucket(
    client: &dyn S3Api,
    registry: &mut ImageRegistry,
    config: &mut S3StorageConfig,
    infra_name: &str,
) {
    let bucket = config.bucket.clone();

    match client.block_public_access(&bucket).await {
        Ok(()) => {
            conditions::set_condition(
                registry,
                STORAGE_PUBLIC_ACCESS_BLOCKED,
                ConditionStatus::True,
                "Public Access Block Successful",
                "Public access to the S3 bucket and its contents have been successfully blocked.",
            );
            mirror_status(registry, StorageSpec::S3(config.clone()));
            mirror_spec(registry, StorageSpec::S3(config.clone()));
        }
        Err(e) => record_failure(registry, STORAGE_PUBLIC_ACCESS_BLOCKED, &e),
    }

    let tags = [(format!("kubernetes.io/cluster/{infra_name}"), "owned".to_string())];
    match client.tag_bucket(&bucket, &tags).await {
        Ok(()) => {
            conditions::set_condition(
                registry,
                STORAGE_TAGGED,
                ConditionStatus::True,
                "Tagging Successful",
                "Tags were successfully applied to the S3 bucket",
            );
        }
        Err(e) => record_failure(registry, STORAGE_TAGGED, &e),
    }

    let encryption = if config.key_id.is_empty() {
        BucketEncryption::Aes256
    } else {
        BucketEncryption::Kms(config.key_id.clone())
    };
    match client.enable_encryption(&bucket, &encryption).await {
        Ok(()) => {
            conditions::set_condition(
                registry,
                STORAGE_ENCRYPTED,
                ConditionStatus::True,
                "Encryption Successful",
                &format!(
                    "Default {} encryption was successfully enabled on the S3 bucket",
                    encryption.algorithm()
                ),
            );
            config.encrypt = true;
            mirror_status(registry, StorageSpec::S3(config.clone()));
            mirror_spec(registry, StorageSpec::S3(config.clone()));
        }
        Err(e) => record_failure(registry, STORAGE_ENCRYPTED, &e),
    }

    match client
        .enable_incomplete_upload_cleanup(
            &bucket,
            INCOMPLETE_UPLOAD_RULE_ID,
            INCOMPLETE_UPLOAD_RETENTION_DAYS,
        )
        .await
    {
        Ok(()) => {
            conditions::set_condition(
                registry,
                STORAGE_INCOMPLETE_UPLOAD_CLEANUP_ENABLED,
                ConditionStatus::True,
                "Enable Cleanup Successful",
                "Default cleanup of incomplete multipart uploads after one (1) day was successfully enabled",
            );
        }
        Err(e) => record_failure(registry, STORAGE_INCOMPLETE_UPLOAD_CLEANUP_ENABLED, &e),
    }
}

fn record_failure(registry: &mut ImageRegistry, condition_type: &str, error: &S3Error) {
    warn!(condition = condition_type, error = %error, "S3 hardening step failed");
    conditions::set_condition(
        registry,
        condition_type,
        ConditionStatus::False,
        error.reason(),
        &error.to_string(),
    );
}
