use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{ArgAction, Parser};
use tether_controller::{ControllerConfig, KindSpec, ReconcileRequest, Reconciler, Supervisor};
use tether_core::{KindRegistrar, WatchedKind};
use tether_kubehub::{CrdRegistrar, KubeSource};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const REFERENCE_GROUP: &str = "networkservicemesh.io";
const REFERENCE_VERSION: &str = "v1";

#[derive(Parser, Debug)]
#[command(name = "tether", version, about = "Watch custom resource kinds and reconcile every change")]
struct Cli {
    /// Kind to watch, e.g. "example.com/v1/Widget" or "example.com/v1/Widget:widgets" (repeatable)
    #[arg(long = "kind", value_name = "GVK")]
    kinds: Vec<WatchedKind>,

    /// Watch a single namespace (default: all namespaces)
    #[arg(long = "ns", env = "TETHER_NAMESPACE")]
    namespace: Option<String>,

    /// Full re-delivery interval; 0 disables resync
    #[arg(long = "resync-secs", env = "TETHER_RESYNC_SECS", default_value_t = 30)]
    resync_secs: u64,

    /// Give up waiting for the initial list after this long; 0 waits forever
    #[arg(long = "sync-timeout-secs", env = "TETHER_SYNC_TIMEOUT_SECS", default_value_t = 60)]
    sync_timeout_secs: u64,

    #[arg(long = "backoff-base-secs", env = "TETHER_BACKOFF_BASE_SECS", default_value_t = 5)]
    backoff_base_secs: u64,

    #[arg(long = "backoff-max-secs", env = "TETHER_BACKOFF_MAX_SECS", default_value_t = 60)]
    backoff_max_secs: u64,

    /// Worker loops per kind
    #[arg(long = "workers", env = "TETHER_WORKERS", default_value_t = 1)]
    workers: usize,

    /// Assume the CustomResourceDefinitions already exist
    #[arg(long = "skip-register", action = ArgAction::SetTrue)]
    skip_register: bool,

    /// Log filter directives, e.g. "info" or "tether_controller=debug"
    #[arg(long = "log", env = "TETHER_LOG", default_value = "info")]
    log: String,

    /// Serve Prometheus metrics on this host:port
    #[arg(long = "metrics-addr", env = "TETHER_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

impl Cli {
    fn config(&self) -> ControllerConfig {
        ControllerConfig::default()
            .with_resync_secs(self.resync_secs)
            .with_sync_timeout_secs(self.sync_timeout_secs)
            .with_backoff(Duration::from_secs(self.backoff_base_secs), Duration::from_secs(self.backoff_max_secs))
            .with_workers(self.workers)
    }

    fn kinds(&self) -> Vec<WatchedKind> {
        if self.kinds.is_empty() {
            reference_kinds()
        } else {
            self.kinds.clone()
        }
    }
}

fn reference_kinds() -> Vec<WatchedKind> {
    [
        ("NetworkService", "networkservices"),
        ("NetworkServiceChannel", "networkservicechannels"),
        ("NetworkServiceEndpoint", "networkserviceendpoints"),
    ]
    .into_iter()
    .map(|(kind, plural)| WatchedKind::new(REFERENCE_GROUP, REFERENCE_VERSION, kind, plural))
    .collect()
}

/// Logs every object it is handed and succeeds.
struct LoggingReconciler;

#[async_trait::async_trait]
impl Reconciler for LoggingReconciler {
    async fn reconcile(&self, req: ReconcileRequest<'_>) -> Result<()> {
        info!(
            kind = %req.kind.kind,
            namespace = %req.key.namespace,
            name = %req.key.name,
            resource_version = req.object.metadata.resource_version.as_deref().unwrap_or(""),
            "found object"
        );
        Ok(())
    }
}

/// Used with `--skip-register`.
struct AssumeRegistered;

#[async_trait::async_trait]
impl KindRegistrar for AssumeRegistered {
    async fn ensure_exists(&self, kind: &WatchedKind) -> Result<()> {
        info!(crd = %kind.crd_name(), "registration skipped");
        Ok(())
    }
}

fn init_tracing(directives: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|e| {
        eprintln!("invalid log filter {directives:?} ({e}); using info");
        tracing_subscriber::EnvFilter::new("info")
    });
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<SocketAddr>) {
    let Some(addr) = addr else { return };
    match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(_) => info!(%addr, "Prometheus metrics exporter listening"),
        Err(e) => warn!(%addr, error = %e, "failed to install metrics exporter"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);
    init_metrics(cli.metrics_addr);

    let client = tether_kubehub::client().await?;
    let registrar: Arc<dyn KindRegistrar> = if cli.skip_register {
        Arc::new(AssumeRegistered)
    } else {
        Arc::new(CrdRegistrar::new(client.clone()))
    };
    let hook: Arc<dyn Reconciler> = Arc::new(LoggingReconciler);

    let mut supervisor = Supervisor::new(cli.config(), registrar);
    for kind in cli.kinds() {
        info!(gvk = %kind.gvk_key(), plural = %kind.plural, ns = ?cli.namespace, "watching kind");
        let source = KubeSource::new(client.clone(), &kind, cli.namespace.as_deref());
        supervisor = supervisor.watch(KindSpec::new(kind, source, Arc::clone(&hook)));
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received; shutting down");
                    shutdown.cancel();
                }
                Err(e) => warn!(error = %e, "cannot listen for interrupt"),
            }
        }
    });

    supervisor.run(shutdown).await?;
    info!("controller exited");
    Ok(())
}
