//! Common test utilities
//!
//! In-memory fakes for the provider and API server seams, plus helpers to seed
//! the reflector stores the listers read from.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube_runtime::watcher;
use registry_storage_operator::constants::{
    CLOUD_CREDENTIALS_SECRET, CLUSTER_RESOURCE_NAME, DEFAULT_OPERATOR_NAMESPACE,
    USER_CONFIGURATION_SECRET,
};
use registry_storage_operator::controller::cache::{cache, CacheWriters, Listers};
use registry_storage_operator::controller::client::{ClientError, RegistryClient};
use registry_storage_operator::crd::{
    AwsPlatformStatus, AzurePlatformStatus, ImageRegistry, ImageRegistrySpec, Infrastructure,
    InfrastructureStatus, PlatformStatus, PlatformType, StorageSpec,
};
use registry_storage_operator::storage::s3::{
    BucketEncryption, BUCKET_ALREADY_EXISTS, NOT_FOUND, NO_SUCH_BUCKET,
};
use registry_storage_operator::storage::{
    AzureApi, AzureClientConfig, AzureError, ProxySettings, S3Api, S3ClientConfig, S3Error,
    StorageBackends, StorageContext, StorageError, StorageSettings,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use zeroize::Zeroizing;

static RUSTLS_INIT: Once = Once::new();

/// Install the ring crypto provider once per test binary
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    });
}

pub const INFRA_NAME: &str = "ci-ln-abc12";
pub const AWS_REGION: &str = "us-east-1";
pub const AZURE_RESOURCE_GROUP: &str = "ci-ln-abc12-rg";

// ---------------------------------------------------------------------------
// S3
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakeS3State {
    pub buckets: HashSet<String>,
    /// Bucket names passed to `create_bucket`, in order
    pub creates: Vec<String>,
    /// Every call, as `operation:bucket`
    pub calls: Vec<String>,
    /// Next `create_bucket` calls answered with `BucketAlreadyExists`
    pub taken: usize,
    pub fail_public_access: bool,
    pub fail_tagging: bool,
    pub fail_encryption: bool,
    pub fail_lifecycle: bool,
    pub tags: Vec<(String, String)>,
    pub encryption: Option<BucketEncryption>,
}

#[derive(Debug, Default)]
pub struct FakeS3 {
    pub state: Mutex<FakeS3State>,
}

impl FakeS3 {
    pub fn with_taken(taken: usize) -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().taken = taken;
        fake
    }

    pub fn with_bucket(bucket: &str) -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().buckets.insert(bucket.to_string());
        fake
    }

    pub fn creates(&self) -> Vec<String> {
        self.state.lock().unwrap().creates.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Seed an account and container as if created by an earlier run
    pub fn with_container(account: &str, container: &str) -> Self {
        let fake = Self::default();
        {
            let mut state = fake.state.lock().unwrap();
            state.accounts.insert(account.to_string());
            state
                .containers
                .insert((account.to_string(), container.to_string()));
        }
        fake
    }

    fn record(&self, op: &str, bucket: &str) -> std::sync::MutexGuard<'_, FakeS3State> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{op}:{bucket}"));
        state
    }
}

fn injected(code: &str) -> S3Error {
    S3Error::service(code, "injected failure")
}

#[async_trait]
impl S3Api for FakeS3 {
    async fn head_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        let state = self.record("head", bucket);
        if state.buckets.contains(bucket) {
            Ok(())
        } else {
            Err(S3Error::service(NOT_FOUND, "bucket not found"))
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        let mut state = self.record("create", bucket);
        state.creates.push(bucket.to_string());
        if state.taken > 0 {
            state.taken -= 1;
            return Err(S3Error::service(BUCKET_ALREADY_EXISTS, "name taken"));
        }
        state.buckets.insert(bucket.to_string());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        let mut state = self.record("delete", bucket);
        if state.buckets.remove(bucket) {
            Ok(())
        } else {
            Err(S3Error::service(NO_SUCH_BUCKET, "no such bucket"))
        }
    }

    async fn block_public_access(&self, bucket: &str) -> Result<(), S3Error> {
        let state = self.record("block_public_access", bucket);
        if state.fail_public_access {
            return Err(injected("AccessDenied"));
        }
        Ok(())
    }

    async fn tag_bucket(&self, bucket: &str, tags: &[(String, String)]) -> Result<(), S3Error> {
        let mut state = self.record("tag", bucket);
        if state.fail_tagging {
            return Err(injected("AccessDenied"));
        }
        state.tags = tags.to_vec();
        Ok(())
    }

    async fn enable_encryption(
        &self,
        bucket: &str,
        encryption: &BucketEncryption,
    ) -> Result<(), S3Error> {
        let mut state = self.record("encrypt", bucket);
        if state.fail_encryption {
            return Err(injected("KMS.NotFoundException"));
        }
        state.encryption = Some(encryption.clone());
        Ok(())
    }

    async fn enable_incomplete_upload_cleanup(
        &self,
        bucket: &str,
        _rule_id: &str,
        _days: i32,
    ) -> Result<(), S3Error> {
        let state = self.record("lifecycle", bucket);
        if state.fail_lifecycle {
            return Err(injected("AccessDenied"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Azure
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakeAzureState {
    pub accounts: HashSet<String>,
    pub containers: HashSet<(String, String)>,
    /// Account names passed to `create_storage_account`, in order
    pub account_creates: Vec<String>,
    pub calls: Vec<String>,
    /// Next `create_storage_account` calls answered with "name not available"
    pub taken: usize,
    /// Next `delete_storage_account` calls that fail with a transport error
    pub failing_account_deletes: usize,
}

#[derive(Debug, Default)]
pub struct FakeAzure {
    pub state: Mutex<FakeAzureState>,
}

pub const FAKE_ACCOUNT_KEY: &str = "ZmFrZS1rZXk=";

impl FakeAzure {
    pub fn with_taken(taken: usize) -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().taken = taken;
        fake
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn account_creates(&self) -> Vec<String> {
        self.state.lock().unwrap().account_creates.clone()
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, FakeAzureState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }
}

#[async_trait]
impl AzureApi for FakeAzure {
    async fn create_storage_account(
        &self,
        _resource_group: &str,
        account: &str,
        _location: &str,
    ) -> Result<(), AzureError> {
        let mut state = self.record(format!("create_account:{account}"));
        state.account_creates.push(account.to_string());
        if state.taken > 0 {
            state.taken -= 1;
            return Err(AzureError::NameNotAvailable {
                account: account.to_string(),
                message: "The storage account named is already taken.".to_string(),
            });
        }
        state.accounts.insert(account.to_string());
        Ok(())
    }

    async fn primary_key(
        &self,
        _resource_group: &str,
        account: &str,
    ) -> Result<Zeroizing<String>, AzureError> {
        let state = self.record(format!("primary_key:{account}"));
        if state.accounts.contains(account) {
            Ok(Zeroizing::new(FAKE_ACCOUNT_KEY.to_string()))
        } else {
            Err(AzureError::AccountNotFound(account.to_string()))
        }
    }

    async fn delete_storage_account(
        &self,
        _resource_group: &str,
        account: &str,
    ) -> Result<(), AzureError> {
        let mut state = self.record(format!("delete_account:{account}"));
        if state.failing_account_deletes > 0 {
            state.failing_account_deletes -= 1;
            return Err(AzureError::Transport("connection reset by peer".to_string()));
        }
        if state.accounts.remove(account) {
            Ok(())
        } else {
            Err(AzureError::AccountNotFound(account.to_string()))
        }
    }

    async fn container_exists(
        &self,
        account: &str,
        _key: &str,
        container: &str,
    ) -> Result<bool, AzureError> {
        let state = self.record(format!("container_exists:{account}/{container}"));
        Ok(state
            .containers
            .contains(&(account.to_string(), container.to_string())))
    }

    async fn create_container(
        &self,
        account: &str,
        _key: &str,
        container: &str,
    ) -> Result<(), AzureError> {
        let mut state = self.record(format!("create_container:{account}/{container}"));
        state
            .containers
            .insert((account.to_string(), container.to_string()));
        Ok(())
    }

    async fn delete_container(
        &self,
        account: &str,
        _key: &str,
        container: &str,
    ) -> Result<(), AzureError> {
        let mut state = self.record(format!("delete_container:{account}/{container}"));
        if state
            .containers
            .remove(&(account.to_string(), container.to_string()))
        {
            Ok(())
        } else {
            Err(AzureError::ContainerNotFound(container.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Hands out the shared fakes and counts client constructions
#[derive(Debug, Default)]
pub struct FakeBackends {
    pub s3: Arc<FakeS3>,
    pub azure: Arc<FakeAzure>,
    pub s3_builds: AtomicUsize,
    pub azure_builds: AtomicUsize,
    pub last_s3_config: Mutex<Option<S3ClientConfig>>,
}

impl FakeBackends {
    pub fn s3(s3: FakeS3) -> Arc<Self> {
        Arc::new(Self {
            s3: Arc::new(s3),
            ..Self::default()
        })
    }

    pub fn azure(azure: FakeAzure) -> Arc<Self> {
        Arc::new(Self {
            azure: Arc::new(azure),
            ..Self::default()
        })
    }

    pub fn builds(&self) -> usize {
        self.s3_builds.load(Ordering::SeqCst) + self.azure_builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackends for FakeBackends {
    async fn s3(&self, config: S3ClientConfig) -> Result<Arc<dyn S3Api>, StorageError> {
        self.s3_builds.fetch_add(1, Ordering::SeqCst);
        *self.last_s3_config.lock().unwrap() = Some(config);
        Ok(Arc::clone(&self.s3) as Arc<dyn S3Api>)
    }

    async fn azure(&self, _config: AzureClientConfig) -> Result<Arc<dyn AzureApi>, StorageError> {
        self.azure_builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.azure) as Arc<dyn AzureApi>)
    }
}

// ---------------------------------------------------------------------------
// API server
// ---------------------------------------------------------------------------

/// One write the reconciler performed
#[derive(Debug, Clone)]
pub enum Write {
    Create(ImageRegistry),
    Update(ImageRegistry),
    UpdateStatus(ImageRegistry),
    Secret(BTreeMap<String, String>),
}

/// Records writes in order; `update` bumps the resource version
#[derive(Debug, Default)]
pub struct FakeClient {
    pub writes: Mutex<Vec<Write>>,
    pub conflict_on_update: Mutex<bool>,
    pub already_exists_on_create: Mutex<bool>,
}

impl FakeClient {
    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().unwrap().clone()
    }

    pub fn registry_writes(&self) -> Vec<Write> {
        self.writes()
            .into_iter()
            .filter(|w| !matches!(w, Write::Secret(_)))
            .collect()
    }
}

fn bump_version(registry: &ImageRegistry) -> ImageRegistry {
    let mut stored = registry.clone();
    let next = stored
        .metadata
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    stored.metadata.resource_version = Some(next.to_string());
    stored
}

#[async_trait]
impl RegistryClient for FakeClient {
    async fn create(&self, registry: &ImageRegistry) -> Result<ImageRegistry, ClientError> {
        if *self.already_exists_on_create.lock().unwrap() {
            return Err(ClientError::AlreadyExists(CLUSTER_RESOURCE_NAME.to_string()));
        }
        self.writes
            .lock()
            .unwrap()
            .push(Write::Create(registry.clone()));
        Ok(bump_version(registry))
    }

    async fn update(&self, registry: &ImageRegistry) -> Result<ImageRegistry, ClientError> {
        if *self.conflict_on_update.lock().unwrap() {
            return Err(ClientError::Conflict(CLUSTER_RESOURCE_NAME.to_string()));
        }
        self.writes
            .lock()
            .unwrap()
            .push(Write::Update(registry.clone()));
        Ok(bump_version(registry))
    }

    async fn update_status(&self, registry: &ImageRegistry) -> Result<ImageRegistry, ClientError> {
        self.writes
            .lock()
            .unwrap()
            .push(Write::UpdateStatus(registry.clone()));
        Ok(bump_version(registry))
    }

    async fn apply_secret(&self, data: BTreeMap<String, String>) -> Result<(), ClientError> {
        self.writes.lock().unwrap().push(Write::Secret(data));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Empty caches for the default operator namespace
pub fn empty_cache() -> (Listers, CacheWriters) {
    cache(DEFAULT_OPERATOR_NAMESPACE)
}

/// Driver tunables with fast polling and small bounds
pub fn fast_settings() -> StorageSettings {
    StorageSettings {
        s3_wait_timeout: Duration::from_secs(2),
        s3_poll_interval: Duration::from_millis(1),
        ..StorageSettings::default()
    }
}

pub fn storage_context(listers: &Listers, backends: Arc<FakeBackends>) -> StorageContext {
    StorageContext {
        listers: listers.clone(),
        proxy: ProxySettings::default(),
        backends,
        settings: fast_settings(),
    }
}

pub fn meta(name: &str, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        resource_version: Some("1".to_string()),
        ..ObjectMeta::default()
    }
}

pub fn secret(name: &str, pairs: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: meta(name, Some(DEFAULT_OPERATOR_NAMESPACE)),
        data: Some(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Secret::default()
    }
}

pub fn seed_secret(writers: &mut CacheWriters, secret: Secret) {
    writers
        .secrets
        .apply_watcher_event(&watcher::Event::Apply(secret));
}

/// Cluster-minted AWS credentials
pub fn seed_aws_credentials(writers: &mut CacheWriters) {
    seed_secret(
        writers,
        secret(
            CLOUD_CREDENTIALS_SECRET,
            &[
                ("aws_access_key_id", "AKIAEXAMPLE"),
                ("aws_secret_access_key", "secret"),
            ],
        ),
    );
}

/// Cluster-minted Azure service principal
pub fn seed_azure_credentials(writers: &mut CacheWriters) {
    seed_secret(
        writers,
        secret(
            CLOUD_CREDENTIALS_SECRET,
            &[
                ("azure_subscription_id", "00000000-0000-0000-0000-000000000001"),
                ("azure_tenant_id", "00000000-0000-0000-0000-000000000002"),
                ("azure_client_id", "00000000-0000-0000-0000-000000000003"),
                ("azure_client_secret", "client-secret"),
                ("azure_resourcegroup", AZURE_RESOURCE_GROUP),
                ("azure_region", "eastus"),
            ],
        ),
    );
}

/// User-provisioned Azure account key
pub fn seed_azure_user_key(writers: &mut CacheWriters, key: &str) {
    seed_secret(
        writers,
        secret(
            USER_CONFIGURATION_SECRET,
            &[("REGISTRY_STORAGE_AZURE_ACCOUNTKEY", key)],
        ),
    );
}

pub fn infrastructure(platform: PlatformType) -> Infrastructure {
    let mut infra = Infrastructure::new(CLUSTER_RESOURCE_NAME, Default::default());
    infra.metadata.resource_version = Some("1".to_string());
    infra.status = Some(InfrastructureStatus {
        infrastructure_name: INFRA_NAME.to_string(),
        platform_status: Some(PlatformStatus {
            r#type: platform,
            aws: (platform == PlatformType::Aws).then(|| AwsPlatformStatus {
                region: AWS_REGION.to_string(),
            }),
            azure: (platform == PlatformType::Azure).then(|| AzurePlatformStatus {
                resource_group_name: AZURE_RESOURCE_GROUP.to_string(),
            }),
        }),
    });
    infra
}

pub fn seed_infrastructure(writers: &mut CacheWriters, platform: PlatformType) {
    writers
        .infrastructures
        .apply_watcher_event(&watcher::Event::Apply(infrastructure(platform)));
}

pub fn seed_claim(writers: &mut CacheWriters, name: &str) {
    writers
        .claims
        .apply_watcher_event(&watcher::Event::Apply(PersistentVolumeClaim {
            metadata: meta(name, Some(DEFAULT_OPERATOR_NAMESPACE)),
            ..PersistentVolumeClaim::default()
        }));
}

pub fn seed_deployment(writers: &mut CacheWriters, deployment: Deployment) {
    writers
        .deployments
        .apply_watcher_event(&watcher::Event::Apply(deployment));
}

pub fn seed_registry(writers: &mut CacheWriters, registry: ImageRegistry) {
    writers
        .registries
        .apply_watcher_event(&watcher::Event::Apply(registry));
}

/// The singleton registry with the given storage, as the API server would return it
pub fn registry(storage: Option<StorageSpec>) -> ImageRegistry {
    let mut cr = ImageRegistry::new(
        CLUSTER_RESOURCE_NAME,
        ImageRegistrySpec {
            storage,
            ..ImageRegistrySpec::default()
        },
    );
    cr.metadata.resource_version = Some("1".to_string());
    cr.metadata.generation = Some(1);
    cr
}

/// Look up a condition as `(status, reason)`
pub fn condition(
    registry: &ImageRegistry,
    condition_type: &str,
) -> Option<(registry_storage_operator::crd::ConditionStatus, String)> {
    registry
        .status
        .as_ref()
        .and_then(|s| s.condition(condition_type))
        .map(|c| (c.status, c.reason.clone().unwrap_or_default()))
}
