//! # Operator Configuration
//!
//! Operator-level settings loaded from environment variables.

use crate::constants::{
    AZURE_ACCOUNT_NAME_ATTEMPTS, DEFAULT_AZURE_PROVISION_TIMEOUT_SECS, DEFAULT_BACKOFF_BASE_MS,
    DEFAULT_BACKOFF_MAX_SECS, DEFAULT_METRICS_PORT, DEFAULT_OPERATOR_NAMESPACE,
    DEFAULT_RESYNC_PERIOD_SECS, DEFAULT_S3_WAIT_TIMEOUT_SECS, DEFAULT_WATCH_RESTART_DELAY_SECS,
    S3_BUCKET_NAME_ATTEMPTS,
};
use crate::storage::StorageSettings;
use std::time::Duration;

/// Operator-level configuration
///
/// All settings have defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace holding the registry workload, its secrets and claims
    pub namespace: String,
    /// Port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// First retry delay after a failed sync (milliseconds)
    pub backoff_base_ms: u64,
    /// Maximum retry delay after repeated failures (seconds)
    pub backoff_max_secs: u64,
    /// Full relist interval of the watches (seconds)
    pub resync_period_secs: u64,
    /// Delay before restarting a watch stream that ended (seconds)
    pub watch_restart_delay_secs: u64,
    /// Attempts at finding a free S3 bucket name
    pub bucket_name_attempts: usize,
    /// Attempts at finding a free Azure storage account name
    pub account_name_attempts: usize,
    /// How long to wait for a new bucket to become visible (seconds)
    pub s3_wait_timeout_secs: u64,
    /// How long to wait for an Azure storage account to provision (seconds)
    pub azure_provision_timeout_secs: u64,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            metrics_port: DEFAULT_METRICS_PORT,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            resync_period_secs: DEFAULT_RESYNC_PERIOD_SECS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            bucket_name_attempts: S3_BUCKET_NAME_ATTEMPTS,
            account_name_attempts: AZURE_ACCOUNT_NAME_ATTEMPTS,
            s3_wait_timeout_secs: DEFAULT_S3_WAIT_TIMEOUT_SECS,
            azure_provision_timeout_secs: DEFAULT_AZURE_PROVISION_TIMEOUT_SECS,
            log_format: "json".to_string(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        let namespace = std::env::var("WATCH_NAMESPACE")
            .ok()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| env_var_or_default_str("POD_NAMESPACE", DEFAULT_OPERATOR_NAMESPACE));
        Self {
            namespace,
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            backoff_base_ms: env_var_or_default("BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE_MS),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            resync_period_secs: env_var_or_default(
                "RESYNC_PERIOD_SECS",
                DEFAULT_RESYNC_PERIOD_SECS,
            ),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            bucket_name_attempts: env_var_or_default(
                "S3_BUCKET_NAME_ATTEMPTS",
                S3_BUCKET_NAME_ATTEMPTS,
            )
            .max(1),
            account_name_attempts: env_var_or_default(
                "AZURE_ACCOUNT_NAME_ATTEMPTS",
                AZURE_ACCOUNT_NAME_ATTEMPTS,
            )
            .max(1),
            s3_wait_timeout_secs: env_var_or_default(
                "S3_WAIT_TIMEOUT_SECS",
                DEFAULT_S3_WAIT_TIMEOUT_SECS,
            ),
            azure_provision_timeout_secs: env_var_or_default(
                "AZURE_PROVISION_TIMEOUT_SECS",
                DEFAULT_AZURE_PROVISION_TIMEOUT_SECS,
            ),
            log_format: env_var_or_default_str("LOG_FORMAT", "json"),
        }
    }

    /// Get backoff base duration
    #[must_use]
    pub fn backoff_base_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Get backoff max duration
    #[must_use]
    pub fn backoff_max_duration(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    /// Get resync period duration
    #[must_use]
    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Driver tunables derived from this configuration
    #[must_use]
    pub fn storage_settings(&self) -> StorageSettings {
        StorageSettings {
            bucket_name_attempts: self.bucket_name_attempts,
            account_name_attempts: self.account_name_attempts,
            s3_wait_timeout: Duration::from_secs(self.s3_wait_timeout_secs),
            azure_provision_timeout: Duration::from_secs(self.azure_provision_timeout_secs),
            ..StorageSettings::default()
        }
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
