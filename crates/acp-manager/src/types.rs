//! Shared value types for the session manager (spec.md §3).

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{AcpError, ErrorCode};

/// Current time as milliseconds since the Unix epoch.
///
/// Hand-rolled rather than pulled from `chrono`: every caller in this crate
/// only needs a monotonically-reasonable integer to compare against, not a
/// calendar-aware timestamp, so the conversion stays in `std::time`.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Opaque, caller-assigned identity used for actor-queue serialization and
/// runtime-cache keying. Validated and normalized at construction so the
/// "reject empty" rule in spec.md §4.5 lives in one place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(raw: impl Into<String>) -> Result<Self, AcpError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(AcpError::new(
                ErrorCode::SessionInitFailed,
                "session_key must not be empty",
            ));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The mode a session was initialized under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Persistent,
    Oneshot,
}

/// How a `runTurn` call should be interpreted by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    Prompt,
    Steer,
}

/// Observable state of a cached session, as surfaced by `getStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Error,
}

/// Value produced by a backend's `ensure_session`; copied between layers
/// (spec.md §3: "Handles are value-typed and copied between layers").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeHandle {
    pub session_key: String,
    pub backend_id: String,
    pub runtime_session_name: String,
    pub cwd: String,
    pub backend_session_id: String,
    pub agent_session_id: String,
    pub backend_record_id: String,
}

/// The caller-visible projection of a cached session (spec.md §3).
#[derive(Debug, Clone)]
pub struct SessionAcpMeta {
    pub backend: String,
    pub agent: String,
    pub runtime_session_name: String,
    pub identity: crate::identity::SessionIdentity,
    pub mode: SessionMode,
    pub runtime_options: RuntimeOptions,
    pub cwd: String,
    pub state: SessionState,
    pub last_error: Option<String>,
    pub last_activity_at: i64,
}

/// Typed runtime-option record replacing a map-of-any (spec.md §9 redesign
/// flag): the two recognized keys are enumerated, everything else is kept in
/// `extra` for forward compatibility.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    pub cwd: Option<String>,
    pub runtime_mode: Option<String>,
    pub extra: std::collections::BTreeMap<String, String>,
}

/// Read-only projection of the runtime cache for `observability()`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RuntimeCacheSnapshot {
    pub active_sessions: usize,
    pub idle_timeout_ms: u64,
    pub evicted_total: u64,
    pub last_evicted_at: Option<i64>,
}

/// Read-only projection of active-turn bookkeeping for `observability()`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TurnsSnapshot {
    pub active_turns: usize,
    pub queue_depth: usize,
    pub completed: u64,
    pub failed: u64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: u64,
}

/// Cumulative turn-latency counters, monotonic for the process lifetime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnLatencyStats {
    pub completed: u64,
    pub failed: u64,
    pub total_ms: u64,
    pub max_ms: u64,
}

impl TurnLatencyStats {
    pub fn record_success(&mut self, latency_ms: u64) {
        self.completed += 1;
        self.total_ms += latency_ms;
        self.max_ms = self.max_ms.max(latency_ms);
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub fn avg_ms(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.completed as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_rejects_empty() {
        assert!(SessionKey::new("").is_err());
        assert!(SessionKey::new("   ").is_err());
    }

    #[test]
    fn session_key_accepts_non_empty() {
        let key = SessionKey::new("abc").unwrap();
        assert_eq!(key.as_str(), "abc");
    }

    #[test]
    fn latency_stats_track_avg_and_max() {
        let mut stats = TurnLatencyStats::default();
        stats.record_success(10);
        stats.record_success(30);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.max_ms, 30);
        assert_eq!(stats.avg_ms(), 20.0);
    }

    #[test]
    fn latency_stats_avg_is_zero_with_no_completions() {
        let stats = TurnLatencyStats::default();
        assert_eq!(stats.avg_ms(), 0.0);
    }
}
