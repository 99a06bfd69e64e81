//! # Reconciler
//!
//! Drives the singleton `ImageRegistry` towards its management state.
//!
//! ## Module Structure
//!
//! - `types.rs` - Reconciler context and error classification
//! - `sync.rs` - One reconciliation pass
//! - `status.rs` - Derived deployment conditions
//! - `verify.rs` - Structural validation
//! - `bootstrap.rs` - Default instance creation
//! - `finalize.rs` - Finalizer handling and teardown on delete
//! - `process.rs` - Work queue loop

mod bootstrap;
mod finalize;
mod process;
mod status;
mod sync;
mod types;
mod verify;

pub use bootstrap::{default_registry, platform_storage};
pub use finalize::{append_finalizer, has_finalizer, strip_finalizer};
pub use status::sync_status;
pub use types::{
    PermanentError, Reconciler, ReconcilerError, REASON_STORAGE_NOT_CONFIGURED,
    REASON_VERIFICATION_FAILED,
};
pub use verify::verify_resource;
