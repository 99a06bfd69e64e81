//! # Event Processor
//!
//! Drains the work queue one key at a time. The queue never hands the same key to
//! two workers, so at most one sync runs at any moment.

use crate::controller::queue::WorkQueue;
use crate::controller::reconciler::types::Reconciler;
use crate::observability::metrics;
use std::time::Instant;
use tracing::{debug, error, info, Instrument};

impl Reconciler {
    /// Process queue keys until the queue shuts down
    pub async fn run(&self, queue: WorkQueue<String>) {
        info!("Started events processor");
        while let Some(key) = queue.get().await {
            metrics::set_queue_depth(queue.len());
            self.process_key(&queue, key).await;
        }
        info!("Shutting down events processor");
    }

    /// Sync once for `key`, then forget or requeue it
    pub async fn process_key(&self, queue: &WorkQueue<String>, key: String) {
        let span = tracing::info_span!("reconciler.sync", key = %key);
        let start = Instant::now();
        debug!(parent: &span, "Got event from work queue");

        let result = self.sync().instrument(span.clone()).await;
        metrics::observe_sync_duration(start.elapsed().as_secs_f64());
        metrics::increment_syncs();

        let _guard = span.enter();
        match result {
            Ok(()) => {
                queue.forget(&key);
                info!("Event from work queue successfully processed");
            }
            Err(e) => {
                metrics::increment_sync_errors(e.kind());
                metrics::increment_requeues();
                error!(error = %e, requeues = queue.num_requeues(&key), "Unable to sync, requeuing");
                queue.add_rate_limited(key.clone());
            }
        }
        queue.done(&key);
    }
}
