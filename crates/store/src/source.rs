use std::sync::{Mutex, PoisonError};

use futures::channel::mpsc;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tether_core::{WatchEvent, WatchSource};

/// In-process feed: events pushed through a [`FeedSender`] are delivered in order.
///
/// The stream can be opened once; later `watch` calls yield an empty stream.
pub struct ChannelSource {
    rx: Mutex<Option<mpsc::UnboundedReceiver<anyhow::Result<WatchEvent>>>>,
}

#[derive(Clone)]
pub struct FeedSender {
    tx: mpsc::UnboundedSender<anyhow::Result<WatchEvent>>,
}

impl ChannelSource {
    pub fn new() -> (Self, FeedSender) {
        let (tx, rx) = mpsc::unbounded();
        (Self { rx: Mutex::new(Some(rx)) }, FeedSender { tx })
    }
}

impl WatchSource for ChannelSource {
    fn watch(&self) -> BoxStream<'static, anyhow::Result<WatchEvent>> {
        match self.rx.lock().unwrap_or_else(PoisonError::into_inner).take() {
            Some(rx) => rx.boxed(),
            None => stream::empty().boxed(),
        }
    }
}

impl FeedSender {
    /// Returns false once the source side is gone.
    pub fn send(&self, ev: WatchEvent) -> bool {
        self.tx.unbounded_send(Ok(ev)).is_ok()
    }

    pub fn send_error(&self, err: anyhow::Error) -> bool {
        self.tx.unbounded_send(Err(err)).is_ok()
    }
}
