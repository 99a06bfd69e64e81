//! Registry Storage Operator Library
//!
//! Provisions and reconciles the object storage backing the image registry:
//! S3 buckets, Azure Blob containers, or a user-managed persistent volume claim.
//!
//! ## Quick Start
//!
//! ```rust
//! use registry_storage_operator::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod storage;
