use std::sync::Arc;

use tether_core::KindRegistrar;
use tether_queue::RateLimitedQueue;
use tether_store::ResourceCache;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ControllerConfig;
use crate::controller::{KindSpec, ResourceController};
use crate::error::{error_channel, HardError, SupervisorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Running,
    ShuttingDown,
    Stopped,
}

/// Top-level lifecycle: registers kinds, runs one controller per kind and
/// shuts all of them down on the first hard error.
pub struct Supervisor {
    config: ControllerConfig,
    registrar: Arc<dyn KindRegistrar>,
    kinds: Vec<KindSpec>,
}

impl Supervisor {
    pub fn new(config: ControllerConfig, registrar: Arc<dyn KindRegistrar>) -> Self {
        Self { config, registrar, kinds: Vec::new() }
    }

    pub fn watch(mut self, spec: KindSpec) -> Self {
        self.kinds.push(spec);
        self
    }

    /// Create-or-confirm every kind's registration. Any failure is fatal.
    pub async fn ensure_registered(&self) -> Result<(), SupervisorError> {
        for spec in &self.kinds {
            let kind = &spec.kind;
            if let Err(e) = self.registrar.ensure_exists(kind).await {
                error!(kind = %kind.gvk_key(), error = %e, "error initializing resource kind");
                return Err(SupervisorError::Registration { kind: kind.gvk_key(), source: e.into() });
            }
            info!(kind = %kind.gvk_key(), "resource kind registered");
        }
        Ok(())
    }

    /// Register kinds, then start every controller and the error waiter.
    ///
    /// Cancelling `shutdown` stops everything cleanly.
    pub async fn spawn(self, shutdown: CancellationToken) -> Result<SupervisorHandle, SupervisorError> {
        self.ensure_registered().await?;

        let root = shutdown.child_token();
        let (errors, errors_rx) = error_channel();
        let (state, _) = watch::channel(SupervisorState::Running);
        let state = Arc::new(state);

        let controllers: Vec<Arc<ResourceController>> = self
            .kinds
            .into_iter()
            .map(|spec| Arc::new(ResourceController::new(spec, &self.config, errors.clone(), root.child_token())))
            .collect();
        drop(errors);

        let tasks = controllers.iter().map(|ctrl| supervise(Arc::clone(ctrl), root.clone())).collect();
        let waiter = tokio::spawn(wait_for_errors(errors_rx, root.clone(), Arc::clone(&state)));
        info!(kinds = controllers.len(), "supervisor running");

        Ok(SupervisorHandle { controllers, tasks, waiter, root, state })
    }

    /// `spawn` followed by `wait`.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), SupervisorError> {
        self.spawn(shutdown).await?.wait().await
    }
}

/// Run one controller and close the top-level stop however it ends.
///
/// Resolves to the failure reason when the controller task died instead of draining.
fn supervise(ctrl: Arc<ResourceController>, root: CancellationToken) -> JoinHandle<Option<String>> {
    let run = tokio::spawn({
        let ctrl = Arc::clone(&ctrl);
        async move { ctrl.start().await }
    });
    tokio::spawn(async move {
        let failure = match run.await {
            Ok(()) => None,
            Err(e) => {
                error!(kind = %ctrl.kind(), error = %e, "resource controller task failed; shutting controller down");
                ctrl.abandon();
                Some(e.to_string())
            }
        };
        root.cancel();
        failure
    })
}

/// Blocks on the shared error channel; the first signal closes the top-level stop.
async fn wait_for_errors(
    mut errors: mpsc::Receiver<HardError>,
    root: CancellationToken,
    state: Arc<watch::Sender<SupervisorState>>,
) -> Option<HardError> {
    let fault = tokio::select! {
        biased;
        Some(err) = errors.recv() => Some(err),
        _ = root.cancelled() => {
            info!("shutdown requested");
            // a signal raised while the stop was closing still counts
            errors.try_recv().ok()
        }
    };
    if let Some(err) = &fault {
        error!(error = %err, "error processing queues, shutting controller down");
    }
    begin_shutdown(&state);
    root.cancel();
    fault
}

fn begin_shutdown(state: &watch::Sender<SupervisorState>) -> bool {
    state.send_if_modified(|s| {
        if *s == SupervisorState::Running {
            *s = SupervisorState::ShuttingDown;
            true
        } else {
            false
        }
    })
}

/// A running supervisor.
pub struct SupervisorHandle {
    controllers: Vec<Arc<ResourceController>>,
    tasks: Vec<JoinHandle<Option<String>>>,
    waiter: JoinHandle<Option<HardError>>,
    root: CancellationToken,
    state: Arc<watch::Sender<SupervisorState>>,
}

impl SupervisorHandle {
    pub fn state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub fn controller(&self, plural: &str) -> Option<&Arc<ResourceController>> {
        self.controllers.iter().find(|c| c.kind().plural == plural)
    }

    pub fn queue(&self, plural: &str) -> Option<Arc<RateLimitedQueue>> {
        self.controller(plural).map(|c| c.queue())
    }

    pub fn cache(&self, plural: &str) -> Option<Arc<ResourceCache>> {
        self.controller(plural).map(|c| c.cache())
    }

    /// Close the top-level stop signal.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// Wait for shutdown and for every controller to finish draining.
    pub async fn wait(self) -> Result<(), SupervisorError> {
        let fault = match self.waiter.await {
            Ok(fault) => fault,
            Err(e) => {
                warn!(error = %e, "error waiter task failed");
                begin_shutdown(&self.state);
                self.root.cancel();
                None
            }
        };
        let mut failed = None;
        for (ctrl, task) in self.controllers.iter().zip(self.tasks) {
            match task.await {
                Ok(None) => {}
                Ok(Some(reason)) => {
                    failed.get_or_insert(SupervisorError::ControllerFailed { kind: ctrl.kind().plural.clone(), reason });
                }
                Err(e) => warn!(kind = %ctrl.kind(), error = %e, "supervising task failed"),
            }
        }
        self.state.send_replace(SupervisorState::Stopped);
        info!("all resource controllers stopped");
        match (fault, failed) {
            (Some(err), _) => Err(SupervisorError::HardFault(err)),
            (None, Some(failed)) => Err(failed),
            (None, None) => Ok(()),
        }
    }
}
