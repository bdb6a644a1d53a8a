use std::sync::Arc;

use kube::core::DynamicObject;
use tether_core::ObjectKey;
use tether_queue::RateLimitedQueue;
use tether_store::ResourceEventHandler;
use tracing::{trace, warn};

/// Turns cache transitions for one kind into queue keys.
pub struct EventRouter {
    kind: String,
    queue: Arc<RateLimitedQueue>,
}

impl EventRouter {
    pub fn new(kind: &str, queue: Arc<RateLimitedQueue>) -> Self {
        Self { kind: kind.to_string(), queue }
    }

    fn enqueue(&self, obj: &DynamicObject) {
        match ObjectKey::for_object(obj) {
            Ok(key) => self.queue.add(&key.to_string()),
            Err(e) => warn!(kind = %self.kind, error = %e, "cannot derive key for notification; dropped"),
        }
    }
}

impl ResourceEventHandler for EventRouter {
    fn on_add(&self, obj: &Arc<DynamicObject>) {
        self.enqueue(obj);
    }

    fn on_update(&self, old: &Arc<DynamicObject>, new: &Arc<DynamicObject>) {
        if changed(old, new) {
            self.enqueue(new);
        } else {
            trace!(kind = %self.kind, name = ?new.metadata.name, "unchanged update skipped");
        }
    }

    fn on_delete(&self, obj: &Arc<DynamicObject>) {
        self.enqueue(obj);
    }
}

/// Whether two observations of an object differ.
///
/// Differing `resourceVersion`s decide it when both sides carry one; otherwise
/// metadata and payload are compared field by field.
pub fn changed(old: &DynamicObject, new: &DynamicObject) -> bool {
    if std::ptr::eq(old, new) {
        return false;
    }
    match (&old.metadata.resource_version, &new.metadata.resource_version) {
        (Some(a), Some(b)) if a != b => true,
        _ => old.metadata != new.metadata || old.data != new.data,
    }
}
