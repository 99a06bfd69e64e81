//! # Custom Resource Definitions
//!
//! CRD types for the registry storage operator.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `ImageRegistry` specification and management state
//! - `storage.rs` - Storage backend configuration (S3, Azure, PVC)
//! - `status.rs` - Status and condition types
//! - `external.rs` - Cluster configuration kinds the operator reads but does not own

mod external;
mod spec;
mod status;
mod storage;

pub use external::{
    AwsPlatformStatus, AzurePlatformStatus, Infrastructure, InfrastructureSpec,
    InfrastructureStatus, PlatformStatus, PlatformType, Proxy, ProxySpec, ProxyStatus,
};
pub use spec::{default_replicas, ImageRegistry, ImageRegistrySpec, ManagementState};
pub use status::{Condition, ConditionStatus, ImageRegistryStatus};
pub use storage::{
    AzureStorageConfig, PvcStorageConfig, S3CloudFrontConfig, S3StorageConfig, SecretKeyRef,
    StorageSpec,
};
