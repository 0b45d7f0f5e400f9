//! Per-session-key FIFO serializer (spec.md §4.2).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::types::SessionKey;

struct Slot {
    lock: Arc<Mutex<()>>,
    pending: usize,
}

/// Guarantees at most one in-flight operation per `SessionKey`. Entries are
/// garbage-collected the moment their pending count reaches zero, so no
/// queue persists for an idle key (spec.md §4.2 invariant).
#[derive(Default)]
pub struct ActorQueue {
    slots: Mutex<HashMap<SessionKey, Slot>>,
}

impl ActorQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of keys with at least one pending or running
    /// operation. Used for queue-depth observability.
    pub async fn queue_depth(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Run `f` inside the critical section for `key`, waiting for any
    /// in-flight operation on the same key to finish first. `f`'s error is
    /// returned as-is; `f` must not recursively call `run` with the same
    /// key or it will deadlock (spec.md §4.2).
    pub async fn run<F, Fut, T, E>(&self, key: &SessionKey, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let lock = self.acquire_slot(key).await;
        let _guard: MutexGuard<'_, ()> = lock.lock().await;
        let result = f().await;
        self.release_slot(key).await;
        result
    }

    async fn acquire_slot(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
            lock: Arc::new(Mutex::new(())),
            pending: 0,
        });
        slot.pending += 1;
        slot.lock.clone()
    }

    async fn release_slot(&self, key: &SessionKey) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(key) {
            slot.pending -= 1;
            if slot.pending == 0 {
                slots.remove(key);
            }
        }
    }
}
