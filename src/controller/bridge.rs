//! # Change Notification Bridge
//!
//! Turns raw watch events from every watched kind into the single work queue key.
//!
//! Rules:
//! - Objects outside the watch's name filter are ignored (cluster-scoped config
//!   kinds are only interesting under their well-known name).
//! - Applied objects whose `resourceVersion` matches the last one seen are resyncs
//!   and are dropped.
//! - Deletions always enqueue.
//!
//! The bridge only records versions and enqueues; it never blocks on I/O.

use crate::constants::WORKQUEUE_KEY;
use crate::controller::queue::WorkQueue;
use kube::{Resource, ResourceExt};
use kube_runtime::watcher;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, trace};

/// Which objects of a watched kind are relevant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameFilter {
    /// Every object of the kind
    All,
    /// Only the object with this name
    Only(String),
}

impl NameFilter {
    fn matches(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(expected) => expected == name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ObjectKey {
    kind: String,
    namespace: Option<String>,
    name: String,
}

/// Filters watch events and feeds the work queue
#[derive(Debug)]
pub struct ChangeBridge {
    queue: WorkQueue<String>,
    seen: Mutex<HashMap<ObjectKey, String>>,
}

impl ChangeBridge {
    #[must_use]
    pub fn new(queue: WorkQueue<String>) -> Self {
        Self {
            queue,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one watch event. Returns `true` if the work queue key was added.
    pub fn observe<K>(&self, filter: &NameFilter, event: &watcher::Event<K>) -> bool
    where
        K: Resource<DynamicType = ()>,
    {
        match event {
            watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
                self.on_apply(filter, obj)
            }
            watcher::Event::Delete(obj) => self.on_delete(filter, obj),
            watcher::Event::Init | watcher::Event::InitDone => false,
        }
    }

    fn on_apply<K>(&self, filter: &NameFilter, obj: &K) -> bool
    where
        K: Resource<DynamicType = ()>,
    {
        let name = obj.name_any();
        if !filter.matches(&name) {
            return false;
        }
        let key = object_key(obj);
        let version = obj.resource_version().unwrap_or_default();

        {
            let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
            if seen.get(&key).is_some_and(|v| !version.is_empty() && *v == version) {
                trace!(kind = %key.kind, name = %key.name, "Ignoring resync with unchanged resourceVersion");
                return false;
            }
            seen.insert(key.clone(), version);
        }

        debug!(kind = %key.kind, name = %key.name, "Object changed, queueing sync");
        self.queue.add(WORKQUEUE_KEY.to_string());
        true
    }

    fn on_delete<K>(&self, filter: &NameFilter, obj: &K) -> bool
    where
        K: Resource<DynamicType = ()>,
    {
        let name = obj.name_any();
        if !filter.matches(&name) {
            return false;
        }
        let key = object_key(obj);
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);

        debug!(kind = %key.kind, name = %key.name, "Object deleted, queueing sync");
        self.queue.add(WORKQUEUE_KEY.to_string());
        true
    }
}

fn object_key<K>(obj: &K) -> ObjectKey
where
    K: Resource<DynamicType = ()>,
{
    ObjectKey {
        kind: K::kind(&()).into_owned(),
        namespace: obj.namespace(),
        name: obj.name_any(),
    }
}
