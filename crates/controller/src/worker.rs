use std::sync::Arc;

use metrics::counter;
use tether_core::{ObjectKey, WatchedKind};
use tether_queue::RateLimitedQueue;
use tether_store::ResourceCache;
use tracing::{debug, error, info, warn};

use crate::error::{ErrorSink, HardError};
use crate::reconcile::{ReconcileRequest, Reconciler, Requeue};

/// Why a worker loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The queue was shut down.
    Shutdown,
    /// A key could not be resolved; the error was escalated and this worker is done.
    HardFault,
}

/// Outcome of handling one dequeued key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    Reconciled,
    Failed,
    SoftDrop,
    HardFault,
}

impl Processed {
    fn label(self) -> &'static str {
        match self {
            Self::Reconciled => "reconciled",
            Self::Failed => "failed",
            Self::SoftDrop => "soft_drop",
            Self::HardFault => "hard_fault",
        }
    }
}

/// Releases a dequeued key on every exit path.
struct DoneGuard<'a> {
    queue: &'a RateLimitedQueue,
    key: &'a str,
}

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.queue.done(self.key);
    }
}

/// Pulls keys for one kind, resolves them through the cache and runs the hook.
#[derive(Clone)]
pub struct ReconcileWorker {
    kind: Arc<WatchedKind>,
    queue: Arc<RateLimitedQueue>,
    cache: Arc<ResourceCache>,
    reconciler: Arc<dyn Reconciler>,
    errors: ErrorSink,
}

impl ReconcileWorker {
    pub fn new(
        kind: Arc<WatchedKind>,
        queue: Arc<RateLimitedQueue>,
        cache: Arc<ResourceCache>,
        reconciler: Arc<dyn Reconciler>,
        errors: ErrorSink,
    ) -> Self {
        Self { kind, queue, cache, reconciler, errors }
    }

    /// Process keys until the queue shuts down or a hard fault occurs.
    pub async fn run(&self) -> WorkerExit {
        loop {
            let Some(key) = self.queue.get().await else {
                debug!(kind = %self.kind, "queue shut down; worker exiting");
                return WorkerExit::Shutdown;
            };
            if self.process(&key).await == Processed::HardFault {
                return WorkerExit::HardFault;
            }
        }
    }

    /// Handle one key previously returned by the queue's `get`.
    pub async fn process(&self, key: &str) -> Processed {
        let outcome = self.handle(key).await;
        counter!("tether_reconcile_total", 1, "kind" => self.kind.plural.clone(), "outcome" => outcome.label());
        outcome
    }

    async fn handle(&self, key: &str) -> Processed {
        let _done = DoneGuard { queue: &self.queue, key };

        let okey = match ObjectKey::parse(key) {
            Ok(k) => k,
            Err(e) => {
                error!(kind = %self.kind, key, error = %e, "error splitting key; dropping");
                self.queue.forget(key);
                return Processed::SoftDrop;
            }
        };
        info!(kind = %self.kind, key, "read item off queue; processing");

        let Some(object) = self.cache.get(&okey) else {
            let err = HardError { kind: self.kind.plural.clone(), key: key.to_string() };
            error!(kind = %self.kind, key, error = %err, "cache lookup failed; escalating");
            self.queue.forget(key);
            self.errors.raise(err);
            return Processed::HardFault;
        };
        debug!(
            kind = %self.kind,
            key,
            resource_version = ?object.metadata.resource_version,
            "resolved latest cached version; syncing"
        );

        let req = ReconcileRequest {
            kind: &self.kind,
            key: &okey,
            object,
            requeue: Requeue::new(&self.queue, key),
        };
        match self.reconciler.reconcile(req).await {
            Ok(()) => {
                self.queue.forget(key);
                info!(kind = %self.kind, key, "finished processing successfully");
                Processed::Reconciled
            }
            Err(e) => {
                warn!(kind = %self.kind, key, error = %e, "reconcile failed");
                Processed::Failed
            }
        }
    }
}
