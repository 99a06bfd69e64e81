//! # Observability
//!
//! - `metrics`: Prometheus metrics collection
//! - `logging`: tracing subscriber set-up

pub mod logging;
pub mod metrics;
