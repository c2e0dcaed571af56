//! Patch subscriptions (`on_patch` / `unsubscribe`).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::normalizer::Patch;

struct Entry {
    live: AtomicBool,
    handler: Box<dyn Fn(&Patch) + Send + Sync>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: BTreeMap<u64, Arc<Entry>>,
}

/// Fan-out point for applied patches.
///
/// `emit` calls a snapshot of the registered handlers outside the registry
/// lock, so a handler may subscribe or unsubscribe from inside its callback.
/// Once [`Subscription::unsubscribe`] returns no new call to that handler
/// starts; one already running on another thread finishes.
#[derive(Clone, Default)]
pub struct PatchHub {
    inner: Arc<Mutex<Registry>>,
}

impl PatchHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_patch<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Patch) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.inner);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.handlers.insert(
            id,
            Arc::new(Entry {
                live: AtomicBool::new(true),
                handler: Box::new(handler),
            }),
        );
        Subscription {
            id,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver one patch to every live handler, each exactly once.
    pub fn emit(&self, patch: &Patch) {
        let snapshot: Vec<Arc<Entry>> = lock(&self.inner).handlers.values().cloned().collect();
        for entry in snapshot {
            if entry.live.load(Ordering::Acquire) {
                (entry.handler)(patch);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).handlers.len()
    }
}

/// Active registration; dropping it unsubscribes too.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    hub: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            let removed = lock(&inner).handlers.remove(&self.id);
            if let Some(entry) = removed {
                entry.live.store(false, Ordering::Release);
            }
        }
    }
}

fn lock(inner: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}
