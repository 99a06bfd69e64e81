//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use registry_storage_operator::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Storage drivers and their provider seams
pub use crate::storage::{
    AzureApi, AzureDriver, ProxySettings, PvcDriver, S3Api, S3Driver, StorageBackends,
    StorageDriver, StorageError, StorageSettings,
};

// Reconciler types
pub use crate::controller::client::{ClientError, RegistryClient};
pub use crate::controller::generator::{Generator, GeneratorError};
pub use crate::controller::reconciler::{PermanentError, Reconciler, ReconcilerError};

pub use crate::config::OperatorConfig;
