//! In-memory runtime cache with idle-TTL eviction bookkeeping (spec.md
//! §4.3).

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::types::{now_ms, RuntimeHandle, SessionKey, SessionMode};

/// The cached state for one live session. Owned exclusively by the runtime
/// cache; only this struct holds the authoritative `runtime_ref`.
#[derive(Debug, Clone)]
pub struct CachedRuntimeState {
    pub backend_id: String,
    pub agent_id: String,
    pub mode: SessionMode,
    pub cwd: String,
    pub handle: RuntimeHandle,
    pub last_touched_at: i64,
}

/// One idle candidate surfaced by [`RuntimeCache::collect_idle_candidates`].
#[derive(Debug, Clone)]
pub struct IdleCandidate {
    pub session_key: SessionKey,
    pub last_touched_at: i64,
    pub handle_snapshot: RuntimeHandle,
}

#[derive(Debug, Default)]
struct EvictionCounters {
    evicted_total: u64,
    last_evicted_at: Option<i64>,
}

/// `session_key -> CachedRuntimeState` table plus eviction counters.
pub struct RuntimeCache {
    entries: RwLock<HashMap<SessionKey, CachedRuntimeState>>,
    counters: RwLock<EvictionCounters>,
    idle_timeout_ms: u64,
}

impl RuntimeCache {
    pub fn new(idle_timeout_ms: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            counters: RwLock::new(EvictionCounters::default()),
            idle_timeout_ms,
        }
    }

    /// Fetch and touch `last_touched_at`.
    pub async fn get(&self, key: &SessionKey) -> Option<CachedRuntimeState> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(key)?;
        entry.last_touched_at = now_ms();
        Some(entry.clone())
    }

    /// Fetch without touching `last_touched_at`.
    pub async fn peek(&self, key: &SessionKey) -> Option<CachedRuntimeState> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn set(&self, key: SessionKey, mut state: CachedRuntimeState) {
        state.last_touched_at = now_ms();
        self.entries.write().await.insert(key, state);
    }

    pub async fn clear(&self, key: &SessionKey) -> Option<CachedRuntimeState> {
        self.entries.write().await.remove(key)
    }

    pub async fn has(&self, key: &SessionKey) -> bool {
        self.entries.read().await.contains_key(key)
    }

    pub async fn size(&self) -> usize {
        self.entries.read().await.len()
    }

    pub fn idle_timeout_ms(&self) -> u64 {
        self.idle_timeout_ms
    }

    /// Entries idle for at least `max_idle_ms` as of `now`.
    pub async fn collect_idle_candidates(&self, max_idle_ms: u64, now: i64) -> Vec<IdleCandidate> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, state)| now.saturating_sub(state.last_touched_at) as u64 >= max_idle_ms)
            .map(|(key, state)| IdleCandidate {
                session_key: key.clone(),
                last_touched_at: state.last_touched_at,
                handle_snapshot: state.handle.clone(),
            })
            .collect()
    }

    pub async fn record_eviction(&self, at: i64) {
        let mut counters = self.counters.write().await;
        counters.evicted_total += 1;
        counters.last_evicted_at = Some(at);
    }

    pub async fn snapshot(&self) -> crate::types::RuntimeCacheSnapshot {
        let counters = self.counters.read().await;
        crate::types::RuntimeCacheSnapshot {
            active_sessions: self.size().await,
            idle_timeout_ms: self.idle_timeout_ms,
            evicted_total: counters.evicted_total,
            last_evicted_at: counters.last_evicted_at,
        }
    }
}
