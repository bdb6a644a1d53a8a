use std::time::Duration;

use tether_queue::ExponentialBackoff;

/// Runtime knobs shared by every resource controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Full re-delivery interval; `None` disables resync.
    pub resync_period: Option<Duration>,
    /// Upper bound on waiting for the initial list; `None` waits until stopped.
    pub sync_timeout: Option<Duration>,
    pub backoff: ExponentialBackoff,
    pub workers_per_kind: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_period: Some(Duration::from_secs(30)),
            sync_timeout: Some(Duration::from_secs(60)),
            backoff: ExponentialBackoff::default(),
            workers_per_kind: 1,
        }
    }
}

impl ControllerConfig {
    pub fn with_resync_secs(mut self, secs: u64) -> Self {
        self.resync_period = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    pub fn with_sync_timeout_secs(mut self, secs: u64) -> Self {
        self.sync_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff = ExponentialBackoff::new(base, max);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers_per_kind = workers.max(1);
        self
    }

    pub(crate) fn workers(&self) -> usize {
        self.workers_per_kind.max(1)
    }
}
