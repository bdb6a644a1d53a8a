use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::core::DynamicObject;
use metrics::counter;
use tether_core::{ObjectKey, WatchEvent, WatchSource};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Items, ResourceCache};

/// Receives cache transitions, after the cache has been updated.
pub trait ResourceEventHandler: Send + Sync {
    fn on_add(&self, obj: &Arc<DynamicObject>);
    fn on_update(&self, old: &Arc<DynamicObject>, new: &Arc<DynamicObject>);
    fn on_delete(&self, obj: &Arc<DynamicObject>);
}

/// Applies a [`WatchSource`] to a [`ResourceCache`] and fans transitions out to a handler.
pub struct Informer {
    cache: Arc<ResourceCache>,
    resync: Option<Duration>,
}

impl Informer {
    pub fn new(kind: &str, resync: Option<Duration>) -> Self {
        Self { cache: Arc::new(ResourceCache::new(kind)), resync: resync.filter(|d| !d.is_zero()) }
    }

    pub fn cache(&self) -> Arc<ResourceCache> {
        Arc::clone(&self.cache)
    }

    /// Ingest `source` until `stop` fires or the stream ends.
    pub async fn run(&self, source: &dyn WatchSource, handler: &dyn ResourceEventHandler, stop: CancellationToken) {
        let kind = self.cache.kind().to_string();
        let mut stream = source.watch();
        let mut resync = self.resync.map(|period| {
            let mut t = tokio::time::interval_at(Instant::now() + period, period);
            t.set_missed_tick_behavior(MissedTickBehavior::Delay);
            t
        });
        info!(kind = %kind, resync_secs = ?self.resync.map(|d| d.as_secs()), "feed started");
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    info!(kind = %kind, "feed stopped");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(ev)) => self.apply(ev, handler),
                    Some(Err(e)) => warn!(kind = %kind, error = %e, "watch error; continuing"),
                    None => {
                        warn!(kind = %kind, "watch stream ended");
                        break;
                    }
                },
                _ = tick(&mut resync) => self.resync(handler),
            }
        }
    }

    /// Apply one feed event to the cache, then notify `handler`.
    pub fn apply(&self, ev: WatchEvent, handler: &dyn ResourceEventHandler) {
        let kind = self.cache.kind();
        match ev {
            WatchEvent::Applied(obj) => {
                let Some(key) = key_of(kind, &obj) else { return };
                let new = Arc::new(obj);
                match self.cache.upsert(key, Arc::clone(&new)) {
                    Some(old) => {
                        counter!("tether_feed_events_total", 1, "kind" => kind.to_string(), "type" => "update");
                        handler.on_update(&old, &new);
                    }
                    None => {
                        counter!("tether_feed_events_total", 1, "kind" => kind.to_string(), "type" => "add");
                        handler.on_add(&new);
                    }
                }
            }
            WatchEvent::Deleted(obj) => {
                let Some(key) = key_of(kind, &obj) else { return };
                self.cache.remove(&key);
                counter!("tether_feed_events_total", 1, "kind" => kind.to_string(), "type" => "delete");
                handler.on_delete(&Arc::new(obj));
            }
            WatchEvent::Restarted(list) => {
                let mut next = Items::default();
                let mut order = Vec::with_capacity(list.len());
                for obj in list {
                    let Some(key) = key_of(kind, &obj) else { continue };
                    if next.insert(key.clone(), Arc::new(obj)).is_none() {
                        order.push(key);
                    }
                }
                let mut prev = self.cache.replace(next.clone());
                debug!(kind = %kind, count = next.len(), previous = prev.len(), "relist applied");
                for key in &order {
                    let Some(new) = next.get(key) else { continue };
                    match prev.remove(key) {
                        Some(old) => handler.on_update(&old, new),
                        None => handler.on_add(new),
                    }
                }
                let mut gone: Vec<_> = prev.into_iter().collect();
                gone.sort_by(|a, b| a.0.cmp(&b.0));
                for (_, old) in gone {
                    handler.on_delete(&old);
                }
                counter!("tether_feed_events_total", 1, "kind" => kind.to_string(), "type" => "relist");
                if self.cache.mark_synced() {
                    info!(kind = %kind, count = order.len(), "cache synced");
                }
            }
        }
    }

    /// Re-deliver every cached object as an unchanged update.
    pub fn resync(&self, handler: &dyn ResourceEventHandler) {
        let items = self.cache.list();
        debug!(kind = %self.cache.kind(), count = items.len(), "resync");
        for obj in &items {
            handler.on_update(obj, obj);
        }
    }
}

fn key_of(kind: &str, obj: &DynamicObject) -> Option<ObjectKey> {
    match ObjectKey::for_object(obj) {
        Ok(key) => Some(key),
        Err(e) => {
            warn!(kind = %kind, error = %e, "dropping feed object without usable key");
            None
        }
    }
}

async fn tick(t: &mut Option<Interval>) {
    match t {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
