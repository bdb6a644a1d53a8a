//! Tether store: per-kind read-model cache fed by a list+watch source.
//!
//! The cache is written only by [`Informer`]; everything else reads it.

#![forbid(unsafe_code)]

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use kube::core::DynamicObject;
use rustc_hash::FxHashMap;
use tether_core::ObjectKey;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

mod informer;
mod source;

pub use informer::{Informer, ResourceEventHandler};
pub use source::{ChannelSource, FeedSender};

pub type Items = FxHashMap<ObjectKey, Arc<DynamicObject>>;

/// Last-known state of every object of one kind.
pub struct ResourceCache {
    kind: String,
    items: RwLock<Items>,
    synced: watch::Sender<bool>,
}

impl ResourceCache {
    pub fn new(kind: &str) -> Self {
        let (synced, _) = watch::channel(false);
        Self { kind: kind.to_string(), items: RwLock::new(Items::default()), synced }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    fn read(&self) -> RwLockReadGuard<'_, Items> {
        self.items.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Items> {
        self.items.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Point lookup; never waits on the feed.
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<DynamicObject>> {
        self.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted keys of every cached object.
    pub fn keys(&self) -> Vec<ObjectKey> {
        let mut keys: Vec<_> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn list(&self) -> Vec<Arc<DynamicObject>> {
        self.read().values().cloned().collect()
    }

    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait until the initial listing has been applied. Returns false if `stop` fires first.
    pub async fn wait_for_sync(&self, stop: &CancellationToken) -> bool {
        let mut rx = self.synced.subscribe();
        tokio::select! {
            synced = async { rx.wait_for(|synced| *synced).await.is_ok() } => synced,
            _ = stop.cancelled() => false,
        }
    }

    pub(crate) fn upsert(&self, key: ObjectKey, obj: Arc<DynamicObject>) -> Option<Arc<DynamicObject>> {
        self.write().insert(key, obj)
    }

    pub(crate) fn remove(&self, key: &ObjectKey) -> Option<Arc<DynamicObject>> {
        self.write().remove(key)
    }

    /// Swap the full contents, returning the previous items.
    pub(crate) fn replace(&self, items: Items) -> Items {
        std::mem::replace(&mut *self.write(), items)
    }

    /// Returns true on the first call only.
    pub(crate) fn mark_synced(&self) -> bool {
        !self.synced.send_replace(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::{ApiResource, GroupVersionKind};

    fn widget(ns: &str, name: &str) -> Arc<DynamicObject> {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("example.com", "v1", "Widget"));
        Arc::new(DynamicObject::new(name, &ar).within(ns))
    }

    #[test]
    fn upsert_get_remove() {
        let cache = ResourceCache::new("widgets");
        let key = ObjectKey::new("default", "foo");
        assert!(cache.get(&key).is_none());
        assert!(cache.upsert(key.clone(), widget("default", "foo")).is_none());
        assert!(cache.upsert(key.clone(), widget("default", "foo")).is_some());
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key).is_some());
        assert!(cache.remove(&key).is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn replace_returns_previous_contents() {
        let cache = ResourceCache::new("widgets");
        cache.upsert(ObjectKey::new("default", "old"), widget("default", "old"));
        let mut next = Items::default();
        next.insert(ObjectKey::new("default", "new"), widget("default", "new"));
        let prev = cache.replace(next);
        assert!(prev.contains_key(&ObjectKey::new("default", "old")));
        assert_eq!(cache.keys(), vec![ObjectKey::new("default", "new")]);
    }

    #[test]
    fn mark_synced_reports_first_transition_only() {
        let cache = ResourceCache::new("widgets");
        assert!(!cache.has_synced());
        assert!(cache.mark_synced());
        assert!(!cache.mark_synced());
        assert!(cache.has_synced());
    }

    #[tokio::test]
    async fn wait_for_sync_returns_false_on_stop() {
        let cache = ResourceCache::new("widgets");
        let stop = CancellationToken::new();
        stop.cancel();
        assert!(!cache.wait_for_sync(&stop).await);
    }

    #[tokio::test]
    async fn wait_for_sync_returns_true_once_synced() {
        let cache = Arc::new(ResourceCache::new("widgets"));
        let stop = CancellationToken::new();
        let waiter = {
            let cache = Arc::clone(&cache);
            let stop = stop.clone();
            tokio::spawn(async move { cache.wait_for_sync(&stop).await })
        };
        tokio::task::yield_now().await;
        cache.mark_synced();
        assert!(waiter.await.unwrap());
    }
}
