//! # Registry Storage Operator
//!
//! Watches the cluster `ImageRegistry` and keeps its object storage provisioned.
//!
//! ## Usage
//!
//! ```bash
//! # Run against the current kubeconfig context
//! registry-storage-operator
//!
//! # Override the namespace and metrics port from the environment
//! registry-storage-operator --namespace my-registry --metrics-port 8080
//! ```

use anyhow::Result;
use clap::Parser;
use registry_storage_operator::config::OperatorConfig;
use registry_storage_operator::runtime::{initialization::initialize, watch_loop::run_watch_loop};

#[derive(Parser, Debug)]
#[command(name = "registry-storage-operator")]
#[command(about = "Provisions and reconciles object storage for the image registry", long_about = None)]
#[command(version)]
struct Cli {
    /// Namespace holding the registry workload and its secrets
    #[arg(long, short = 'n')]
    namespace: Option<String>,

    /// Port for /metrics, /healthz and /readyz
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Log format (json, text)
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = OperatorConfig::from_env();
    if let Some(namespace) = cli.namespace {
        config.namespace = namespace;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics_port = port;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }

    let init = initialize(config).await?;
    run_watch_loop(init).await
}
