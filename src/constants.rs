//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Name of the singleton `ImageRegistry` resource and of the cluster-scoped
/// `Proxy` and `Infrastructure` objects the operator reads.
pub const CLUSTER_RESOURCE_NAME: &str = "cluster";

/// Default namespace the registry workload and its secrets live in
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "openshift-image-registry";

/// Name of the registry deployment whose availability feeds status conditions
pub const REGISTRY_DEPLOYMENT_NAME: &str = "image-registry";

/// Finalizer appended while the operator manages storage
pub const REGISTRY_FINALIZER: &str = "imageregistry.operator.openshift.io/finalizer";

/// Work queue key shared by every watched kind
pub const WORKQUEUE_KEY: &str = "changes";

/// Secret the operator writes with the storage access credentials
pub const PRIVATE_CONFIGURATION_SECRET: &str = "image-registry-private-configuration";

/// User-supplied secret that overrides cluster-minted credentials
pub const USER_CONFIGURATION_SECRET: &str = "image-registry-private-configuration-user";

/// Credentials minted by the cloud credential operator
pub const CLOUD_CREDENTIALS_SECRET: &str = "installer-cloud-credentials";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 60000;

/// Default resync period for watched kinds (seconds)
pub const DEFAULT_RESYNC_PERIOD_SECS: u64 = 600;

/// Default per-key rate limiter base delay (milliseconds)
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 5;

/// Default per-key rate limiter maximum delay (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 1000;

/// Attempts at generating a free Azure storage account name
pub const AZURE_ACCOUNT_NAME_ATTEMPTS: usize = 10;

/// Attempts at generating a free S3 bucket name. Bucket names share one
/// global namespace so collisions are cheap and expected.
pub const S3_BUCKET_NAME_ATTEMPTS: usize = 5000;

/// How long to wait for an S3 bucket to appear or disappear (seconds)
pub const DEFAULT_S3_WAIT_TIMEOUT_SECS: u64 = 120;

/// How long to wait for an Azure storage account creation to finish (seconds)
pub const DEFAULT_AZURE_PROVISION_TIMEOUT_SECS: u64 = 600;

/// Default delay before restarting a watch stream after an error (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;
