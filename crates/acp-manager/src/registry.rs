//! Runtime backend registry (spec.md §4.1).

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// A pluggable ACP runtime backend: spawns/manages agent sessions, runs
/// turns, and tears them down. Implemented by `acp-stdio` and by test
/// doubles.
#[async_trait::async_trait]
pub trait RuntimeBackend: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;

    async fn ensure_session(
        &self,
        session_key: &str,
        agent: &str,
        cwd: &str,
    ) -> anyhow::Result<crate::types::RuntimeHandle>;

    /// Start a turn, returning the receiving half of a channel the backend
    /// streams raw events into. `request_id` is caller-supplied for
    /// correlation in logs; backends are not required to echo it anywhere
    /// on the wire. `cancel` fires when the manager's active-turn state is
    /// canceled; the backend must end (or drop) the event stream once it
    /// observes this, rather than relying solely on its own `cancel` call
    /// completing (spec.md §8: a turn that blocks on context cancellation
    /// must still be unblockable).
    async fn run_turn(
        &self,
        handle: &crate::types::RuntimeHandle,
        text: &str,
        mode: crate::types::TurnMode,
        request_id: &str,
        cancel: CancellationToken,
    ) -> anyhow::Result<tokio::sync::mpsc::Receiver<crate::events::AcpEvent>>;

    async fn set_mode(
        &self,
        handle: &crate::types::RuntimeHandle,
        mode: &str,
    ) -> Result<(), BackendControlError>;

    async fn set_config_option(
        &self,
        handle: &crate::types::RuntimeHandle,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), BackendControlError>;

    async fn cancel(
        &self,
        handle: &crate::types::RuntimeHandle,
        reason: &str,
    ) -> anyhow::Result<()>;

    async fn close(&self, handle: &crate::types::RuntimeHandle, reason: &str)
        -> anyhow::Result<()>;

    /// `None` when the backend does not implement runtime status at all
    /// (spec.md §4.5 `getStatus`: "optional runtime status (nil when the
    /// backend does not implement it)").
    async fn runtime_status(
        &self,
        _handle: &crate::types::RuntimeHandle,
    ) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    async fn doctor(&self) -> DoctorReport {
        DoctorReport { ok: true, code: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorReport {
    pub ok: bool,
    pub code: Option<crate::error::ErrorCode>,
}

/// A control call (`set_mode`/`set_config_option`) failed. Distinguishes
/// "not supported by this backend" from a generic failure so the manager
/// can preserve `BACKEND_UNSUPPORTED_CONTROL` rather than re-wrapping it
/// (spec.md §4.5, §7).
#[derive(Debug, thiserror::Error)]
pub enum BackendControlError {
    #[error("backend does not support control \"{0}\"")]
    Unsupported(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("backend id must not be empty")]
    BackendIdRequired,
    /// `BackendDescriptor::runtime_ref` is non-optional, so this variant is
    /// currently unreachable by construction (made-illegal-states rather
    /// than validated); kept for `RUNTIME_MISSING` parity with the wire
    /// error codes.
    #[error("runtime reference must not be absent")]
    RuntimeMissing,
}

/// A registered backend descriptor. `healthy` is evaluated lazily and must
/// be panic-safe: any fault during evaluation is treated as "unhealthy"
/// (spec.md §4.1).
pub struct BackendDescriptor {
    pub id: String,
    pub runtime_ref: Arc<dyn RuntimeBackend>,
    pub healthy: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl std::fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("id", &self.id)
            .field("has_health_predicate", &self.healthy.is_some())
            .finish()
    }
}

impl BackendDescriptor {
    fn is_healthy(&self) -> bool {
        match &self.healthy {
            None => true,
            Some(predicate) => {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| predicate()))
                    .unwrap_or(false)
            }
        }
    }
}

fn normalize_id(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub ids: Vec<String>,
}

/// Process-wide mapping from normalized backend id to descriptor.
#[derive(Default)]
pub struct BackendRegistry {
    entries: HashMap<String, BackendDescriptor>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: BackendDescriptor) -> Result<(), RegistryError> {
        let normalized = normalize_id(&descriptor.id);
        if normalized.is_empty() {
            return Err(RegistryError::BackendIdRequired);
        }
        self.entries.insert(
            normalized.clone(),
            BackendDescriptor {
                id: normalized.clone(),
                ..descriptor
            },
        );
        acp_core::event_log::emit_event_best_effort(acp_core::event_log::EventFields {
            level: "info",
            source: "acp-manager",
            action: "backend_registered",
            backend: Some(normalized),
            ..Default::default()
        });
        Ok(())
    }

    pub fn unregister(&mut self, id: &str) {
        self.entries.remove(&normalize_id(id));
    }

    /// Case-insensitive, whitespace-trimmed lookup. An empty `id` means
    /// "any healthy backend", falling back to "any backend" so callers can
    /// distinguish `BACKEND_UNAVAILABLE` from `BACKEND_MISSING`.
    pub fn lookup(&self, id: &str) -> Option<&BackendDescriptor> {
        let normalized = normalize_id(id);
        if normalized.is_empty() {
            return self
                .entries
                .values()
                .find(|d| d.is_healthy())
                .or_else(|| self.entries.values().next());
        }
        self.entries
            .get(&normalized)
            .filter(|d| d.is_healthy())
    }

    /// Like [`Self::lookup`] but distinguishes "absent" from "present but
    /// unhealthy" via `Err`.
    pub fn require(&self, id: &str) -> Result<&BackendDescriptor, RequireError> {
        let normalized = normalize_id(id);
        if normalized.is_empty() {
            return self
                .entries
                .values()
                .find(|d| d.is_healthy())
                .map(Ok)
                .unwrap_or_else(|| {
                    if self.entries.is_empty() {
                        Err(RequireError::Missing)
                    } else {
                        Err(RequireError::Unavailable)
                    }
                });
        }
        match self.entries.get(&normalized) {
            None => Err(RequireError::Missing),
            Some(entry) if entry.is_healthy() => Ok(entry),
            Some(_) => Err(RequireError::Unavailable),
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        let healthy = self.entries.values().filter(|d| d.is_healthy()).count();
        RegistryStats {
            total: self.entries.len(),
            healthy,
            unhealthy: self.entries.len() - healthy,
            ids,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequireError {
    Missing,
    Unavailable,
}
