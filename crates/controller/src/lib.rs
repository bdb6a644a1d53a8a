//! Tether controller: routes cache transitions to per-kind queues, runs reconcile
//! workers and supervises every watched kind under one stop signal.

#![forbid(unsafe_code)]

mod config;
mod controller;
mod error;
mod reconcile;
mod router;
mod supervisor;
mod worker;

pub use config::ControllerConfig;
pub use controller::{KindSpec, KindState, ResourceController};
pub use error::{error_channel, ErrorSink, HardError, SupervisorError};
pub use reconcile::{ReconcileRequest, Reconciler, Requeue};
pub use router::{changed, EventRouter};
pub use supervisor::{Supervisor, SupervisorHandle, SupervisorState};
pub use worker::{Processed, ReconcileWorker, WorkerExit};
