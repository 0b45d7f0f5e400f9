//! Active-turn tracking and the cancel-latch pattern (spec.md §4.4).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::types::{RuntimeHandle, SessionKey};

/// One-shot, multiple-waiter latch around a single backend `Cancel` call
/// (spec.md §4.4, §9: "maps naturally to a future/promise or a one-shot
/// channel; avoid sharing a mutex across the backend `Cancel` call").
///
/// Implemented with `tokio::sync::watch` rather than a plain mutex: the
/// first caller to observe `None` spawns the backend call and publishes the
/// result once; every other caller only ever awaits the channel.
#[derive(Clone)]
pub struct CancelLatch {
    tx: Arc<watch::Sender<Option<Result<(), String>>>>,
}

impl CancelLatch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Result<(), String>>> {
        self.tx.subscribe()
    }

    pub fn settle(&self, result: Result<(), String>) {
        let _ = self.tx.send(Some(result));
    }

    pub async fn wait(&self) -> Result<(), String> {
        let mut rx = self.subscribe();
        if let Some(result) = rx.borrow().clone() {
            return result;
        }
        loop {
            if rx.changed().await.is_err() {
                return Err("cancel latch closed without settling".to_string());
            }
            if let Some(result) = rx.borrow().clone() {
                return result;
            }
        }
    }
}

impl Default for CancelLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-session record of an in-flight turn. At most one exists per
/// `SessionKey` at any instant (spec.md §3 invariant, enforced jointly by
/// the actor queue and the manager's `active_turns` map).
pub struct ActiveTurnState {
    pub handle: RuntimeHandle,
    pub abort: CancellationToken,
    pub cancel_latch: Mutex<Option<CancelLatch>>,
    pub started_at: i64,
}

impl ActiveTurnState {
    pub fn new(handle: RuntimeHandle, started_at: i64) -> Self {
        Self {
            handle,
            abort: CancellationToken::new(),
            cancel_latch: Mutex::new(None),
            started_at,
        }
    }
}

/// `session_key -> ActiveTurnState` table guarded by a single mutex, as
/// spec.md §3 requires ("guarded by the manager's mutex").
#[derive(Default)]
pub struct ActiveTurns {
    inner: Mutex<HashMap<SessionKey, Arc<ActiveTurnState>>>,
}

impl ActiveTurns {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &SessionKey) -> Option<Arc<ActiveTurnState>> {
        self.inner.lock().await.get(key).cloned()
    }

    pub async fn insert(&self, key: SessionKey, state: Arc<ActiveTurnState>) {
        self.inner.lock().await.insert(key, state);
    }

    pub async fn remove(&self, key: &SessionKey) {
        self.inner.lock().await.remove(key);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_latch_delivers_result_to_all_waiters() {
        let latch = CancelLatch::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let latch = latch.clone();
                tokio::spawn(async move { latch.wait().await })
            })
            .collect();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        latch.settle(Ok(()));

        for w in waiters {
            assert_eq!(w.await.unwrap(), Ok(()));
        }
    }

    #[tokio::test]
    async fn cancel_latch_returns_cached_result_after_settling() {
        let latch = CancelLatch::new();
        latch.settle(Err("backend down".to_string()));
        assert_eq!(latch.wait().await, Err("backend down".to_string()));
        assert_eq!(latch.wait().await, Err("backend down".to_string()));
    }

    #[tokio::test]
    async fn active_turns_tracks_at_most_one_per_key() {
        let turns = ActiveTurns::new();
        let key = SessionKey::new("k").unwrap();
        assert!(turns.get(&key).await.is_none());

        let state = Arc::new(ActiveTurnState::new(RuntimeHandle::default(), 0));
        turns.insert(key.clone(), state).await;
        assert_eq!(turns.len().await, 1);
        assert!(turns.get(&key).await.is_some());

        turns.remove(&key).await;
        assert!(turns.is_empty().await);
    }
}
