//! # Work Queue
//!
//! A deduplicating, rate-limited work queue.
//!
//! - Adding a key that is already waiting is a no-op, so bursts of events collapse
//!   into one pending item.
//! - A key handed out by [`WorkQueue::get`] is "processing" until [`WorkQueue::done`];
//!   adds during that window mark it dirty and it is queued again on `done`, never
//!   handed to a second worker at the same time.
//! - [`WorkQueue::add_rate_limited`] re-adds a key after its per-key exponential
//!   backoff; [`WorkQueue::forget`] resets that backoff.

use crate::controller::backoff::ExponentialBackoff;
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Cloneable handle to a shared work queue
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

struct Inner<K> {
    state: Mutex<QueueState<K>>,
    limiter: Mutex<ExponentialBackoff<K>>,
    notify: Notify,
}

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> std::fmt::Debug for WorkQueue<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("WorkQueue")
            .field("queued", &state.queue.len())
            .field("processing", &state.processing.len())
            .field("shutting_down", &state.shutting_down)
            .finish_non_exhaustive()
    }
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
{
    /// Create a queue whose rate limiter starts at `base` and caps at `max`
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                limiter: Mutex::new(ExponentialBackoff::new(base, max)),
                notify: Notify::new(),
            }),
        }
    }

    /// Mark `key` as needing processing
    pub fn add(&self, key: K) {
        let mut state = lock(&self.inner.state);
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            // Requeued by `done` once the current worker finishes
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            {
                let mut state = lock(&self.inner.state);
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Finish processing `key`, re-queueing it if it was added meanwhile
    pub fn done(&self, key: &K) {
        let mut state = lock(&self.inner.state);
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Re-add `key` after its exponential backoff delay
    pub fn add_rate_limited(&self, key: K) {
        let delay = lock(&self.inner.limiter).next_backoff(&key);
        self.add_after(key, delay);
    }

    /// Add `key` once `delay` has elapsed
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        debug!(key = ?key, delay_ms = delay.as_millis(), "Scheduling delayed add");
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Stop tracking backoff for `key`
    pub fn forget(&self, key: &K) {
        lock(&self.inner.limiter).forget(key);
    }

    /// Consecutive rate-limited re-adds of `key` since it was last forgotten
    #[must_use]
    pub fn num_requeues(&self, key: &K) -> u32 {
        lock(&self.inner.limiter).failures(key)
    }

    /// Number of keys waiting to be handed out
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner.state).queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out keys. Waiting and future `get` calls return `None`.
    pub fn shutdown(&self) {
        lock(&self.inner.state).shutting_down = true;
        self.inner.notify.notify_waiters();
        self.inner.notify.notify_one();
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        lock(&self.inner.state).shutting_down
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> WorkQueue<String> {
        WorkQueue::new(Duration::from_millis(5), Duration::from_secs(1000))
    }

    #[tokio::test]
    async fn test_add_coalesces_pending_keys() {
        let q = queue();
        q.add("changes".to_string());
        q.add("changes".to_string());
        q.add("changes".to_string());
        assert_eq!(q.len(), 1);

        assert_eq!(q.get().await.as_deref(), Some("changes"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_add_while_processing_requeues_once_on_done() {
        let q = queue();
        q.add("changes".to_string());
        let key = q.get().await.unwrap();

        q.add("changes".to_string());
        q.add("changes".to_string());
        // Not handed out again while a worker holds it
        assert!(q.is_empty());

        q.done(&key);
        assert_eq!(q.len(), 1);
        let again = q.get().await.unwrap();
        q.done(&again);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_get_waits_for_add() {
        let q = queue();
        let producer = q.clone();
        let handle = tokio::spawn(async move { producer.add("changes".to_string()) });

        assert_eq!(q.get().await.as_deref(), Some("changes"));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters() {
        let q = queue();
        let waiter = q.clone();
        let handle = tokio::spawn(async move { waiter.get().await });

        tokio::task::yield_now().await;
        q.shutdown();
        assert_eq!(handle.await.unwrap(), None);

        q.add("changes".to_string());
        assert!(q.is_empty());
        assert!(q.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_rate_limited_delays_and_counts() {
        let q = queue();
        let key = "changes".to_string();

        q.add_rate_limited(key.clone());
        assert!(q.is_empty());
        assert_eq!(q.num_requeues(&key), 1);

        assert_eq!(q.get().await, Some(key.clone()));
        q.done(&key);

        q.add_rate_limited(key.clone());
        assert_eq!(q.num_requeues(&key), 2);
        q.forget(&key);
        assert_eq!(q.num_requeues(&key), 0);
    }
}
