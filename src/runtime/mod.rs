//! # Runtime
//!
//! - `initialization`: start-up of logging, metrics, probes, client and reconciler
//! - `watch_loop`: watches, cache sync, event processing and shutdown
//! - `error_policy`: watch stream error classification

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
