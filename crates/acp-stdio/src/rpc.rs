//! Request id generation and response matching for the stdio JSON-RPC
//! dialect (spec.md §4.6: "monotonically-increasing integer ids derived
//! from a high-resolution timestamp; responses are matched by id").

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::oneshot;

static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// A monotonically-increasing id seeded from the current time in
/// microseconds, bumped by at least 1 on every call so ids are unique even
/// when called faster than the clock's resolution.
pub fn next_request_id() -> i64 {
    let now_micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0);
    loop {
        let last = LAST_ID.load(Ordering::SeqCst);
        let candidate = now_micros.max(last + 1);
        if LAST_ID
            .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return candidate;
        }
    }
}

/// Tracks requests awaiting a response, keyed by the id assigned at send
/// time.
#[derive(Default)]
pub struct PendingRequests {
    inner: HashMap<i64, oneshot::Sender<serde_json::Value>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: i64) -> oneshot::Receiver<serde_json::Value> {
        let (tx, rx) = oneshot::channel();
        self.inner.insert(id, tx);
        rx
    }

    /// Deliver a response to its waiter, if still registered. Returns
    /// `true` if a waiter was found.
    pub fn resolve(&mut self, id: i64, value: serde_json::Value) -> bool {
        match self.inner.remove(&id) {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_request_id_is_strictly_increasing() {
        let mut last = next_request_id();
        for _ in 0..100 {
            let next = next_request_id();
            assert!(next > last);
            last = next;
        }
    }

    #[tokio::test]
    async fn pending_requests_delivers_response_to_matching_waiter() {
        let mut pending = PendingRequests::new();
        let rx = pending.register(1);
        assert!(pending.resolve(1, serde_json::json!({"ok": true})));
        let value = rx.await.unwrap();
        assert_eq!(value, serde_json::json!({"ok": true}));
    }

    #[test]
    fn resolve_returns_false_for_unknown_id() {
        let mut pending = PendingRequests::new();
        assert!(!pending.resolve(999, serde_json::Value::Null));
    }
}
