use std::sync::Arc;

use futures::future::join_all;
use tether_core::{WatchSource, WatchedKind};
use tether_queue::RateLimitedQueue;
use tether_store::{Informer, ResourceCache};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ControllerConfig;
use crate::error::ErrorSink;
use crate::reconcile::Reconciler;
use crate::router::EventRouter;
use crate::worker::{ReconcileWorker, WorkerExit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindState {
    Starting,
    Synced,
    /// The initial list did not arrive in time; workers run against a partial cache.
    Degraded,
    Draining,
    Stopped,
}

/// One watched kind together with its feed and reconciliation hook.
pub struct KindSpec {
    pub kind: WatchedKind,
    pub source: Box<dyn WatchSource>,
    pub reconciler: Arc<dyn Reconciler>,
}

impl KindSpec {
    pub fn new(kind: WatchedKind, source: impl WatchSource + 'static, reconciler: Arc<dyn Reconciler>) -> Self {
        Self { kind, source: Box::new(source), reconciler }
    }
}

/// Cache, router, queue and workers for a single kind.
pub struct ResourceController {
    kind: Arc<WatchedKind>,
    informer: Informer,
    queue: Arc<RateLimitedQueue>,
    source: Box<dyn WatchSource>,
    reconciler: Arc<dyn Reconciler>,
    errors: ErrorSink,
    config: ControllerConfig,
    stop: CancellationToken,
    state: watch::Sender<KindState>,
}

impl ResourceController {
    /// `stop` is this kind's stop signal; pass a child of the supervisor's token.
    pub fn new(spec: KindSpec, config: &ControllerConfig, errors: ErrorSink, stop: CancellationToken) -> Self {
        let name = spec.kind.plural.clone();
        let (state, _) = watch::channel(KindState::Starting);
        Self {
            kind: Arc::new(spec.kind),
            informer: Informer::new(&name, config.resync_period),
            queue: Arc::new(RateLimitedQueue::new(&name, config.backoff)),
            source: spec.source,
            reconciler: spec.reconciler,
            errors,
            config: config.clone(),
            stop,
            state,
        }
    }

    pub fn kind(&self) -> &WatchedKind {
        &self.kind
    }

    pub fn queue(&self) -> Arc<RateLimitedQueue> {
        Arc::clone(&self.queue)
    }

    pub fn cache(&self) -> Arc<ResourceCache> {
        self.informer.cache()
    }

    pub fn state(&self) -> watch::Receiver<KindState> {
        self.state.subscribe()
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Close this kind's stop signal; the feed ends and the workers drain.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Tear down after `start` ended abnormally: stop the feed, release workers and mark stopped.
    pub(crate) fn abandon(&self) {
        self.stop.cancel();
        self.queue.shut_down();
        self.state.send_replace(KindState::Stopped);
    }

    /// Run the feed and the worker loops until the stop signal fires.
    pub async fn start(&self) {
        self.state.send_replace(KindState::Starting);
        let router = EventRouter::new(&self.kind.plural, self.queue());

        let feed = self.informer.run(self.source.as_ref(), &router, self.stop.clone());
        let drain = async {
            self.stop.cancelled().await;
            self.state.send_replace(KindState::Draining);
            info!(kind = %self.kind, "stopping; shutting down queue");
            self.queue.shut_down();
        };
        let work = async {
            if !self.wait_for_sync().await {
                return;
            }
            let workers: Vec<_> = (0..self.config.workers())
                .map(|_| {
                    ReconcileWorker::new(
                        Arc::clone(&self.kind),
                        self.queue(),
                        self.cache(),
                        Arc::clone(&self.reconciler),
                        self.errors.clone(),
                    )
                })
                .collect();
            let exits = join_all(workers.iter().map(|w| w.run())).await;
            let faulted = exits.iter().filter(|e| **e == WorkerExit::HardFault).count();
            if faulted > 0 {
                error!(kind = %self.kind, faulted, "workers stopped on hard error");
            }
        };

        tokio::join!(feed, drain, work);
        self.state.send_replace(KindState::Stopped);
        info!(kind = %self.kind, "resource controller stopped");
    }

    /// Returns false only when stopped before the cache synced.
    async fn wait_for_sync(&self) -> bool {
        let cache = self.informer.cache();
        let synced = match self.config.sync_timeout {
            Some(limit) => tokio::time::timeout(limit, cache.wait_for_sync(&self.stop)).await.unwrap_or(false),
            None => cache.wait_for_sync(&self.stop).await,
        };
        if synced {
            self.state.send_replace(KindState::Synced);
            info!(kind = %self.kind, objects = cache.len(), "informer is ready");
            return true;
        }
        if self.stop.is_cancelled() {
            return false;
        }
        self.state.send_replace(KindState::Degraded);
        warn!(kind = %self.kind, "error waiting for informer cache to sync; continuing degraded");
        true
    }
}
