//! # Initialization
//!
//! Operator start-up: rustls, tracing, metrics, the probe server, the Kubernetes
//! client, caches, the work queue and the reconciler.

use crate::config::OperatorConfig;
use crate::constants::WORKQUEUE_KEY;
use crate::controller::cache::{cache, CacheWriters, Listers};
use crate::controller::client::{KubeRegistryClient, RegistryClient};
use crate::controller::generator::Generator;
use crate::controller::queue::WorkQueue;
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::observability;
use crate::observability::logging::LogFormat;
use crate::storage::CloudBackends;
use anyhow::{Context, Result};
use kube::Client;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{error, info};

/// Everything the watch loop needs
#[allow(
    missing_debug_implementations,
    reason = "holds reflector writers which do not implement Debug"
)]
pub struct InitializationResult {
    pub client: Client,
    pub config: OperatorConfig,
    pub listers: Listers,
    pub writers: CacheWriters,
    pub queue: WorkQueue<String>,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
}

/// Initialize the operator runtime
///
/// # Errors
/// Returns an error when metrics cannot be registered or no Kubernetes client
/// can be built
pub async fn initialize(config: OperatorConfig) -> Result<InitializationResult> {
    // Must happen before anything opens a TLS connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .unwrap_or_else(|_| panic!("Failed to install rustls crypto provider"));

    observability::logging::init_tracing(LogFormat::parse(&config.log_format));

    info!("Starting Registry Storage Operator");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(
        namespace = %config.namespace,
        metrics_port = config.metrics_port,
        "Operator configuration loaded"
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(false)),
    });
    let server_state_clone = Arc::clone(&server_state);
    let port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_server(port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let (listers, writers) = cache(&config.namespace);
    let queue = WorkQueue::new(config.backoff_base_duration(), config.backoff_max_duration());

    let registry_client: Arc<dyn RegistryClient> =
        Arc::new(KubeRegistryClient::new(client.clone(), &config.namespace));
    let generator = Generator::new(
        Arc::clone(&registry_client),
        Arc::new(CloudBackends),
        config.storage_settings(),
    );
    let reconciler = Arc::new(Reconciler::new(listers.clone(), registry_client, generator));

    // Creates the ImageRegistry on first start if nothing else triggers a sync
    queue.add_rate_limited(WORKQUEUE_KEY.to_string());

    info!("Operator initialized, starting watches...");
    Ok(InitializationResult {
        client,
        config,
        listers,
        writers,
        queue,
        reconciler,
        server_state,
    })
}
