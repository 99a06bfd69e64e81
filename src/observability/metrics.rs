//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `registry_storage_syncs_total` - Total number of sync passes
//! - `registry_storage_sync_errors_total` - Sync passes that returned an error, by kind
//! - `registry_storage_sync_duration_seconds` - Duration of sync passes
//! - `registry_storage_requeues_total` - Work items put back on the queue with backoff
//! - `registry_storage_queue_depth` - Work items waiting in the queue
//! - `registry_storage_operations_total` - Storage driver operations by provider and operation
//! - `registry_storage_operation_errors_total` - Failed storage driver operations
//! - `registry_storage_operation_duration_seconds` - Duration of storage driver operations

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;
use std::time::Instant;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static SYNCS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("registry_storage_syncs_total", "Total number of sync passes")
        .expect("Failed to create SYNCS_TOTAL metric - this should never happen")
});

static SYNC_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "registry_storage_sync_errors_total",
            "Total number of failed sync passes by error kind",
        ),
        &["kind"],
    )
    .expect("Failed to create SYNC_ERRORS_TOTAL metric - this should never happen")
});

static SYNC_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "registry_storage_sync_duration_seconds",
            "Duration of sync passes in seconds",
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
    )
    .expect("Failed to create SYNC_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "registry_storage_requeues_total",
        "Total number of rate-limited requeues",
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static QUEUE_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "registry_storage_queue_depth",
        "Number of work items waiting in the queue",
    )
    .expect("Failed to create QUEUE_DEPTH metric - this should never happen")
});

static STORAGE_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "registry_storage_operations_total",
            "Total number of storage driver operations by provider and operation",
        ),
        &["provider", "operation"],
    )
    .expect("Failed to create STORAGE_OPERATIONS_TOTAL metric - this should never happen")
});

static STORAGE_OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "registry_storage_operation_errors_total",
            "Total number of failed storage driver operations by provider and operation",
        ),
        &["provider", "operation"],
    )
    .expect("Failed to create STORAGE_OPERATION_ERRORS_TOTAL metric - this should never happen")
});

static STORAGE_OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "registry_storage_operation_duration_seconds",
            "Duration of storage driver operations in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["provider", "operation"],
    )
    .expect("Failed to create STORAGE_OPERATION_DURATION metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Registration only fails when a metric is registered twice"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(SYNCS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SYNC_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SYNC_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone()))?;
    REGISTRY.register(Box::new(STORAGE_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORAGE_OPERATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORAGE_OPERATION_DURATION.clone()))?;

    Ok(())
}

pub fn increment_syncs() {
    SYNCS_TOTAL.inc();
}

/// Count a failed sync; `kind` is `permanent` or `transient`
pub fn increment_sync_errors(kind: &str) {
    SYNC_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_sync_duration(duration: f64) {
    SYNC_DURATION.observe(duration);
}

pub fn increment_requeues() {
    REQUEUES_TOTAL.inc();
}

pub fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(i64::try_from(depth).unwrap_or(i64::MAX));
}

/// Record one storage driver operation that started at `started`
pub fn observe_storage_operation(provider: &str, operation: &str, started: Instant, ok: bool) {
    let labels = [provider, operation];
    STORAGE_OPERATIONS_TOTAL.with_label_values(&labels).inc();
    STORAGE_OPERATION_DURATION
        .with_label_values(&labels)
        .observe(started.elapsed().as_secs_f64());
    if !ok {
        STORAGE_OPERATION_ERRORS_TOTAL.with_label_values(&labels).inc();
    }
}
