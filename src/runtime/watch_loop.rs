//! # Watch Loop
//!
//! Starts one watch task per cached kind, waits for the caches to fill, then
//! drains the work queue until a shutdown signal arrives.
//!
//! Each watch task applies events to its store before handing them to the
//! change bridge, so a sync triggered by an event always sees that event in
//! the cache.

use crate::constants::{CLUSTER_RESOURCE_NAME, WORKQUEUE_KEY};
use crate::controller::bridge::{ChangeBridge, NameFilter};
use crate::controller::queue::WorkQueue;
use crate::crd::{ImageRegistry, Infrastructure, Proxy};
use crate::runtime::error_policy::handle_watch_stream_error;
use crate::runtime::initialization::InitializationResult;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret};
use kube::api::Api;
use kube::Resource;
use kube_runtime::reflector::store::Writer;
use kube_runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

/// Run the operator until SIGINT/SIGTERM
///
/// # Errors
/// Returns an error when the caches can never become ready
pub async fn run_watch_loop(init: InitializationResult) -> Result<(), anyhow::Error> {
    let InitializationResult {
        client,
        config,
        listers,
        writers,
        queue,
        reconciler,
        server_state,
    } = init;

    let bridge = Arc::new(ChangeBridge::new(queue.clone()));
    let namespace = config.namespace.as_str();
    let restart_delay = config.watch_restart_delay_duration();
    let cluster = || NameFilter::Only(CLUSTER_RESOURCE_NAME.to_string());

    let watches = vec![
        spawn_watch(
            Api::<ImageRegistry>::all(client.clone()),
            writers.registries,
            cluster(),
            Arc::clone(&bridge),
            restart_delay,
        ),
        spawn_watch(
            Api::<Deployment>::namespaced(client.clone(), namespace),
            writers.deployments,
            NameFilter::All,
            Arc::clone(&bridge),
            restart_delay,
        ),
        spawn_watch(
            Api::<Secret>::namespaced(client.clone(), namespace),
            writers.secrets,
            NameFilter::All,
            Arc::clone(&bridge),
            restart_delay,
        ),
        spawn_watch(
            Api::<PersistentVolumeClaim>::namespaced(client.clone(), namespace),
            writers.claims,
            NameFilter::All,
            Arc::clone(&bridge),
            restart_delay,
        ),
        spawn_watch(
            Api::<Proxy>::all(client.clone()),
            writers.proxies,
            cluster(),
            Arc::clone(&bridge),
            restart_delay,
        ),
        spawn_watch(
            Api::<Infrastructure>::all(client),
            writers.infrastructures,
            cluster(),
            Arc::clone(&bridge),
            restart_delay,
        ),
    ];
    let resync = spawn_resync(queue.clone(), config.resync_period());

    info!("Waiting for caches to sync");
    listers
        .wait_until_ready()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for caches to sync: {e}"))?;

    let processor = {
        let reconciler = Arc::clone(&reconciler);
        let queue = queue.clone();
        tokio::spawn(async move { reconciler.run(queue).await })
    };
    server_state.is_ready.store(true, Ordering::Relaxed);
    info!("Caches synced, operator is ready");

    let _ = tokio::signal::ctrl_c().await;
    info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
    server_state.is_ready.store(false, Ordering::Relaxed);
    queue.shutdown();
    info!("Marked server as not ready, waiting for the in-flight sync to complete...");

    if let Err(e) = processor.await {
        warn!("Events processor task failed: {}", e);
    }
    resync.abort();
    for watch in watches {
        watch.abort();
    }

    info!("Operator stopped gracefully");
    Ok(())
}

/// Watch one kind, feeding its store and the change bridge
fn spawn_watch<K>(
    api: Api<K>,
    mut writer: Writer<K>,
    filter: NameFilter,
    bridge: Arc<ChangeBridge>,
    restart_delay: Duration,
) -> JoinHandle<()>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + std::fmt::Debug + Send + Sync + 'static,
{
    let kind = K::kind(&()).to_string();
    tokio::spawn(async move {
        loop {
            let span = tracing::span!(tracing::Level::INFO, "controller.watch", kind = %kind);
            let stream = watcher(api.clone(), watcher::Config::default()).default_backoff();
            let mut stream = std::pin::pin!(stream);

            async {
                info!("Starting watch");
                while let Some(event) = stream.next().await {
                    match event {
                        Ok(event) => {
                            writer.apply_watcher_event(&event);
                            bridge.observe(&filter, &event);
                        }
                        Err(e) => {
                            handle_watch_stream_error(&kind, &format!("{e:?}"));
                        }
                    }
                }
            }
            .instrument(span)
            .await;

            warn!(
                kind = %kind,
                "Watch stream ended, restarting in {} seconds...",
                restart_delay.as_secs()
            );
            tokio::time::sleep(restart_delay).await;
        }
    })
}

/// Periodically enqueue a sync even when nothing changed
fn spawn_resync(queue: WorkQueue<String>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // First tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if queue.is_shutting_down() {
                return;
            }
            queue.add(WORKQUEUE_KEY.to_string());
        }
    })
}
