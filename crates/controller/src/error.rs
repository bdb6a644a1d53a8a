use metrics::counter;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// A dequeued key whose object the cache could not resolve. Escalates to full shutdown.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: object {key} could not be resolved from cache")]
pub struct HardError {
    pub kind: String,
    pub key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("registering resource kind {kind}: {source}")]
    Registration {
        kind: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    #[error("hard error, controller shut down: {0}")]
    HardFault(HardError),
    #[error("resource controller for {kind} failed: {reason}")]
    ControllerFailed { kind: String, reason: String },
}

/// Sending half of the shared hard-error channel.
///
/// Raising never blocks: while one signal is pending, further signals are dropped.
#[derive(Debug, Clone)]
pub struct ErrorSink {
    tx: mpsc::Sender<HardError>,
}

pub fn error_channel() -> (ErrorSink, mpsc::Receiver<HardError>) {
    let (tx, rx) = mpsc::channel(1);
    (ErrorSink { tx }, rx)
}

impl ErrorSink {
    /// Returns true if this call enqueued the signal.
    pub fn raise(&self, err: HardError) -> bool {
        counter!("tether_hard_errors_total", 1, "kind" => err.kind.clone());
        match self.tx.try_send(err) {
            Ok(()) => true,
            Err(TrySendError::Full(err)) => {
                debug!(kind = %err.kind, key = %err.key, "hard error already pending");
                false
            }
            Err(TrySendError::Closed(err)) => {
                debug!(kind = %err.kind, key = %err.key, "hard error after supervisor exit");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hard(key: &str) -> HardError {
        HardError { kind: "widgets".into(), key: key.into() }
    }

    #[test]
    fn second_signal_is_dropped_while_first_is_pending() {
        let (sink, mut rx) = error_channel();
        let other = sink.clone();
        assert!(sink.raise(hard("default/a")));
        assert!(!other.raise(hard("default/b")));
        assert_eq!(rx.try_recv().unwrap(), hard("default/a"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn raise_after_receiver_dropped_is_harmless() {
        let (sink, rx) = error_channel();
        drop(rx);
        assert!(!sink.raise(hard("default/a")));
    }

    #[test]
    fn display_names_kind_and_key() {
        assert_eq!(hard("default/bar").to_string(), "widgets: object default/bar could not be resolved from cache");
    }
}
