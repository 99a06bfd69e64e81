//! # Controller
//!
//! Core controller modules for the Registry Storage Operator.
//!
//! - `backoff`: Per-key exponential backoff for requeues
//! - `bridge`: Watch events to the single work queue key
//! - `cache`: Read-only listers over the reflector stores
//! - `client`: API server writes behind a trait
//! - `conditions`: Status condition helpers
//! - `generator`: Storage convergence and the private configuration secret
//! - `queue`: Deduplicating rate-limited work queue
//! - `reconciler`: Core reconciliation logic
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod bridge;
pub mod cache;
pub mod client;
pub mod conditions;
pub mod generator;
pub mod queue;
pub mod reconciler;
pub mod server;
