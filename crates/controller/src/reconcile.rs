use std::sync::Arc;
use std::time::Duration;

use kube::core::DynamicObject;
use tether_core::{ObjectKey, WatchedKind};
use tether_queue::RateLimitedQueue;

/// Everything a reconciliation hook gets for one key.
pub struct ReconcileRequest<'a> {
    pub kind: &'a WatchedKind,
    pub key: &'a ObjectKey,
    pub object: Arc<DynamicObject>,
    pub requeue: Requeue<'a>,
}

/// Re-enqueue handle bound to the key being reconciled.
pub struct Requeue<'a> {
    queue: &'a RateLimitedQueue,
    key: &'a str,
}

impl<'a> Requeue<'a> {
    pub(crate) fn new(queue: &'a RateLimitedQueue, key: &'a str) -> Self {
        Self { queue, key }
    }

    /// Ordinary re-enqueue; delivered again once the current pass is done.
    pub fn now(&self) {
        self.queue.add(self.key);
    }

    pub fn after(&self, delay: Duration) {
        self.queue.add_after(self.key, delay);
    }

    /// Re-enqueue after the key's backoff delay. Pair with an `Err` return so the
    /// retry count is not forgotten.
    pub fn with_backoff(&self) -> Duration {
        self.queue.add_rate_limited(self.key)
    }
}

/// The pluggable reconciliation hook.
///
/// `Ok` makes the worker forget the key's retry state. On `Err` the worker only
/// releases the key; retrying is the hook's call via [`Requeue`].
#[async_trait::async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, req: ReconcileRequest<'_>) -> anyhow::Result<()>;
}
