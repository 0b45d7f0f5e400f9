//! Session manager core: composes the actor queue, runtime cache,
//! active-turn tracker, and backend registry into the operations described
//! in spec.md §4.5.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use acp_core::event_log::{emit_event_best_effort, EventFields};

use crate::actor_queue::ActorQueue;
use crate::cache::{CachedRuntimeState, RuntimeCache};
use crate::config::ManagerConfig;
use crate::error::{AcpError, ErrorCode};
use crate::events::AcpEvent;
use crate::identity::{IdentitySource, SessionIdentity};
use crate::registry::{BackendControlError, BackendRegistry, RequireError};
use crate::turns::{ActiveTurnState, ActiveTurns, CancelLatch};
use crate::types::{
    now_ms, RuntimeOptions, SessionAcpMeta, SessionKey, SessionMode, SessionState, TurnLatencyStats,
    TurnMode, TurnsSnapshot,
};

/// Bounded timeout the idle evictor gives a backend's `close` call, so a
/// hung backend cannot pin the evictor (spec.md §4.3, §5).
const IDLE_EVICT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Observability {
    pub runtime_cache: crate::types::RuntimeCacheSnapshot,
    pub turns: TurnsSnapshot,
    pub errors_by_code: HashMap<String, u64>,
}

pub struct CloseOutcome {
    pub runtime_closed: bool,
    pub runtime_notice: Option<String>,
    pub meta_cleared: bool,
}

#[derive(Default)]
struct Stats {
    latency: TurnLatencyStats,
    errors_by_code: HashMap<String, u64>,
}

/// Composes the session-manager primitives. One instance is expected per
/// process; callers that want a process-wide singleton can wrap it in a
/// `OnceLock` at the call site (spec.md §9: global singletons are kept only
/// as a thin accessor over a constructor-injected value).
pub struct SessionManager {
    registry: BackendRegistry,
    cache: RuntimeCache,
    actor_queue: ActorQueue,
    active_turns: Arc<ActiveTurns>,
    pending_initializations: Mutex<usize>,
    stats: Arc<Mutex<Stats>>,
}

impl SessionManager {
    pub fn new(registry: BackendRegistry, idle_timeout_ms: u64) -> Self {
        Self {
            registry,
            cache: RuntimeCache::new(idle_timeout_ms),
            actor_queue: ActorQueue::new(),
            active_turns: Arc::new(ActiveTurns::new()),
            pending_initializations: Mutex::new(0),
            stats: Arc::new(Mutex::new(Stats::default())),
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    fn normalize_key(raw: &str) -> Result<SessionKey, AcpError> {
        SessionKey::new(raw)
    }

    /// Evict every idle candidate, re-checking liveness inside each
    /// candidate's actor-queue slot (spec.md §4.3).
    pub async fn evict_idle(&self, cfg: &ManagerConfig) {
        if cfg.idle_timeout_ms == 0 {
            return;
        }
        let now = now_ms();
        let candidates = self
            .cache
            .collect_idle_candidates(cfg.idle_timeout_ms, now)
            .await;
        for candidate in candidates {
            let key = candidate.session_key.clone();
            let _ = self
                .actor_queue
                .run::<_, _, (), ()>(&key, || async {
                    if self.active_turns.get(&key).await.is_some() {
                        return Ok(());
                    }
                    let Some(current) = self.cache.peek(&key).await else {
                        return Ok(());
                    };
                    let still_idle = now_ms().saturating_sub(current.last_touched_at) as u64
                        >= cfg.idle_timeout_ms;
                    if !still_idle {
                        return Ok(());
                    }
                    self.cache.clear(&key).await;
                    if let Some(backend) = self.registry.lookup(&current.backend_id) {
                        let _ = tokio::time::timeout(
                            IDLE_EVICT_CLOSE_TIMEOUT,
                            backend.runtime_ref.close(&current.handle, "idle-evicted"),
                        )
                        .await;
                    }
                    self.cache.record_eviction(now_ms()).await;
                    tracing::info!(session_key = %key, "idle_evicted");
                    emit_event_best_effort(EventFields {
                        level: "info",
                        source: "acp-manager",
                        action: "idle_evicted",
                        session_key: Some(key.to_string()),
                        backend: Some(current.backend_id.clone()),
                        ..Default::default()
                    });
                    Ok(())
                })
                .await;
        }
    }

    pub async fn initialize(
        &self,
        cfg: &ManagerConfig,
        session_key: &str,
        agent: &str,
        mode: SessionMode,
        cwd: &str,
        backend_id: &str,
    ) -> Result<SessionAcpMeta, AcpError> {
        let key = Self::normalize_key(session_key)?;
        self.actor_queue
            .run(&key, || async {
                if let Some(cached) = self.cache.get(&key).await {
                    return Ok(Self::meta_from_cache(&cached, SessionState::Idle, now_ms()));
                }

                let mut slot_held = false;
                if cfg.max_concurrent_sessions > 0 {
                    let mut pending = self.pending_initializations.lock().await;
                    let in_flight = self.cache.size().await + *pending;
                    if in_flight >= cfg.max_concurrent_sessions {
                        return Err(AcpError::session_limit_reached(
                            in_flight,
                            cfg.max_concurrent_sessions,
                        ));
                    }
                    *pending += 1;
                    slot_held = true;
                }

                let result = self.initialize_uncached(agent, cwd, backend_id, mode).await;

                if slot_held {
                    let mut pending = self.pending_initializations.lock().await;
                    *pending = pending.saturating_sub(1);
                }

                let (handle, meta) = result?;
                self.cache
                    .set(
                        key.clone(),
                        CachedRuntimeState {
                            backend_id: handle.backend_id.clone(),
                            agent_id: agent.to_string(),
                            mode,
                            cwd: cwd.to_string(),
                            handle,
                            last_touched_at: now_ms(),
                        },
                    )
                    .await;
                tracing::info!(session_key = %key, "session_initialized");
                emit_event_best_effort(EventFields {
                    level: "info",
                    source: "acp-manager",
                    action: "session_initialized",
                    session_key: Some(key.to_string()),
                    backend: Some(meta.backend.clone()),
                    agent_session_id: Some(meta.runtime_session_name.clone()),
                    ..Default::default()
                });
                Ok(meta)
            })
            .await
    }

    async fn initialize_uncached(
        &self,
        agent: &str,
        cwd: &str,
        backend_id: &str,
        mode: SessionMode,
    ) -> Result<(crate::types::RuntimeHandle, SessionAcpMeta), AcpError> {
        let descriptor = self
            .registry
            .require(backend_id)
            .map_err(|e| Self::require_error_to_acp(e, backend_id))?;
        let handle = descriptor
            .runtime_ref
            .ensure_session("", agent, cwd)
            .await
            .map_err(|e| AcpError::wrap(ErrorCode::SessionInitFailed, e))?;

        let identity = SessionIdentity::pending(IdentitySource::Ensure);
        let meta = SessionAcpMeta {
            backend: handle.backend_id.clone(),
            agent: agent.to_string(),
            runtime_session_name: handle.runtime_session_name.clone(),
            identity,
            mode,
            runtime_options: RuntimeOptions {
                cwd: Some(cwd.to_string()),
                ..Default::default()
            },
            cwd: cwd.to_string(),
            state: SessionState::Idle,
            last_error: None,
            last_activity_at: now_ms(),
        };
        Ok((handle, meta))
    }

    fn require_error_to_acp(err: RequireError, backend_id: &str) -> AcpError {
        match err {
            RequireError::Missing => AcpError::new(ErrorCode::BackendMissing, "backend not registered"),
            RequireError::Unavailable => {
                emit_event_best_effort(EventFields {
                    level: "warn",
                    source: "acp-manager",
                    action: "backend_unhealthy",
                    backend: Some(backend_id.to_string()),
                    ..Default::default()
                });
                AcpError::new(ErrorCode::BackendUnavailable, "backend registered but unhealthy")
            }
        }
    }

    fn meta_from_cache(cached: &CachedRuntimeState, state: SessionState, now: i64) -> SessionAcpMeta {
        SessionAcpMeta {
            backend: cached.backend_id.clone(),
            agent: cached.agent_id.clone(),
            runtime_session_name: cached.handle.runtime_session_name.clone(),
            identity: SessionIdentity::from_handle(
                IdentitySource::Ensure,
                cached.handle.backend_session_id.clone(),
                cached.handle.agent_session_id.clone(),
            ),
            mode: cached.mode,
            runtime_options: RuntimeOptions {
                cwd: Some(cached.cwd.clone()),
                ..Default::default()
            },
            cwd: cached.cwd.clone(),
            state,
            last_error: None,
            last_activity_at: now,
        }
    }

    pub async fn get_status(
        &self,
        cfg: &ManagerConfig,
        session_key: &str,
    ) -> Result<SessionAcpMeta, AcpError> {
        self.evict_idle(cfg).await;
        let key = Self::normalize_key(session_key)?;
        self.actor_queue
            .run(&key, || async {
                let cached = self
                    .cache
                    .peek(&key)
                    .await
                    .ok_or_else(|| AcpError::new(ErrorCode::SessionInitFailed, "no session"))?;
                Ok(Self::meta_from_cache(&cached, SessionState::Idle, now_ms()))
            })
            .await
    }

    pub async fn set_mode(
        &self,
        _cfg: &ManagerConfig,
        session_key: &str,
        mode: &str,
    ) -> Result<(), AcpError> {
        let key = Self::normalize_key(session_key)?;
        self.actor_queue
            .run(&key, || async {
                let cached = self
                    .cache
                    .peek(&key)
                    .await
                    .ok_or_else(|| AcpError::new(ErrorCode::SessionInitFailed, "no session"))?;
                if self.active_turns.get(&key).await.is_some() {
                    return Err(AcpError::already_active());
                }
                let descriptor = self
                    .registry
                    .require(&cached.backend_id)
                    .map_err(|e| Self::require_error_to_acp(e, &cached.backend_id))?;
                descriptor
                    .runtime_ref
                    .set_mode(&cached.handle, mode)
                    .await
                    .map_err(|e| Self::control_error_to_acp(e, "session/set_mode"))
            })
            .await
    }

    pub async fn set_config_option(
        &self,
        _cfg: &ManagerConfig,
        session_key: &str,
        key_name: &str,
        value: serde_json::Value,
    ) -> Result<(), AcpError> {
        let key = Self::normalize_key(session_key)?;
        self.actor_queue
            .run(&key, || async {
                let cached = self
                    .cache
                    .peek(&key)
                    .await
                    .ok_or_else(|| AcpError::new(ErrorCode::SessionInitFailed, "no session"))?;
                let descriptor = self
                    .registry
                    .require(&cached.backend_id)
                    .map_err(|e| Self::require_error_to_acp(e, &cached.backend_id))?;
                descriptor
                    .runtime_ref
                    .set_config_option(&cached.handle, key_name, value)
                    .await
                    .map_err(|e| Self::control_error_to_acp(e, "session/set_config_option"))
            })
            .await
    }

    fn control_error_to_acp(err: BackendControlError, control: &str) -> AcpError {
        match err {
            BackendControlError::Unsupported(_) => AcpError::unsupported_control(control),
            BackendControlError::Other(e) => AcpError::wrap(ErrorCode::TurnFailed, e),
        }
    }

    pub async fn run_turn(
        &self,
        _cfg: &ManagerConfig,
        session_key: &str,
        text: &str,
        mode: TurnMode,
        request_id: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<AcpEvent>, AcpError> {
        let key = Self::normalize_key(session_key)?;
        let started_at = now_ms();
        let raw_rx = self
            .actor_queue
            .run(&key, || async {
                let cached = self
                    .cache
                    .peek(&key)
                    .await
                    .ok_or_else(|| AcpError::new(ErrorCode::SessionInitFailed, "no session"))?;
                if self.active_turns.get(&key).await.is_some() {
                    return Err(AcpError::already_active());
                }
                let descriptor = self
                    .registry
                    .require(&cached.backend_id)
                    .map_err(|e| Self::require_error_to_acp(e, &cached.backend_id))?;
                let state = Arc::new(ActiveTurnState::new(cached.handle.clone(), started_at));
                let raw_rx = descriptor
                    .runtime_ref
                    .run_turn(&cached.handle, text, mode, request_id, state.abort.clone())
                    .await
                    .map_err(|e| AcpError::wrap(ErrorCode::TurnFailed, e))?;
                self.active_turns.insert(key.clone(), state).await;
                tracing::info!(session_key = %key, request_id, "turn_started");
                emit_event_best_effort(EventFields {
                    level: "info",
                    source: "acp-manager",
                    action: "turn_started",
                    session_key: Some(key.to_string()),
                    backend: Some(cached.backend_id.clone()),
                    request_id: Some(request_id.to_string()),
                    ..Default::default()
                });
                Ok(raw_rx)
            })
            .await?;

        let (tracked_tx, tracked_rx) = tokio::sync::mpsc::channel(16);
        let key_for_task = key.clone();
        let active_turns = self.active_turns.clone();
        let stats = self.stats.clone();
        tokio::spawn(Self::pump_turn_events(
            raw_rx,
            tracked_tx,
            key_for_task,
            active_turns,
            stats,
            started_at,
        ));

        Ok(tracked_rx)
    }

    async fn pump_turn_events(
        mut raw_rx: tokio::sync::mpsc::Receiver<AcpEvent>,
        tracked_tx: tokio::sync::mpsc::Sender<AcpEvent>,
        key: SessionKey,
        active_turns: Arc<ActiveTurns>,
        stats: Arc<Mutex<Stats>>,
        started_at: i64,
    ) {
        let mut failed = false;
        while let Some(event) = raw_rx.recv().await {
            if let Some(code) = event.error_code() {
                let mut stats = stats.lock().await;
                *stats.errors_by_code.entry(code.as_str().to_string()).or_insert(0) += 1;
                failed = true;
            }
            if tracked_tx.send(event).await.is_err() {
                break;
            }
        }
        active_turns.remove(&key).await;
        let mut stats = stats.lock().await;
        if failed {
            stats.latency.record_failure();
        } else {
            stats
                .latency
                .record_success((now_ms() - started_at).max(0) as u64);
        }
        tracing::info!(session_key = %key, "turn_completed");
        emit_event_best_effort(EventFields {
            level: "info",
            source: "acp-manager",
            action: "turn_completed",
            session_key: Some(key.to_string()),
            result: Some(if failed { "error" } else { "ok" }.to_string()),
            ..Default::default()
        });
    }

    /// Unlike the other operations, `cancel` does not run inside
    /// `ActorQueue::run` for this key: `close` calls `cancel` directly, and
    /// routing both through the same actor-queue slot would deadlock
    /// (§4.2). Concurrent callers are instead serialized by
    /// `active_turns`'s own mutex and the cancel-latch's settle-once
    /// semantics.
    pub async fn cancel(
        &self,
        cfg: &ManagerConfig,
        session_key: &str,
        reason: &str,
    ) -> Result<(), AcpError> {
        self.evict_idle(cfg).await;
        let key = Self::normalize_key(session_key)?;
        let turn = self.active_turns.get(&key).await;
        let Some(turn) = turn else {
            return Ok(());
        };

        let latch = {
            let mut guard = turn.cancel_latch.lock().await;
            if let Some(existing) = guard.as_ref() {
                existing.clone()
            } else {
                let latch = CancelLatch::new();
                *guard = Some(latch.clone());
                turn.abort.cancel();

                let backend_id = self.resolve_backend_id_for(&key).await;
                let handle = turn.handle.clone();
                let registry_lookup = backend_id.and_then(|id| self.registry.lookup(&id).map(|d| d.runtime_ref.clone()));
                let reason = reason.to_string();
                let latch_for_task = latch.clone();
                tokio::spawn(async move {
                    let result = match registry_lookup {
                        Some(backend) => backend
                            .cancel(&handle, &reason)
                            .await
                            .map_err(|e| e.to_string()),
                        None => Err("backend unavailable for cancel".to_string()),
                    };
                    latch_for_task.settle(result);
                });
                latch
            }
        };

        let result = latch
            .wait()
            .await
            .map_err(|e| AcpError::wrap(ErrorCode::TurnFailed, anyhow::anyhow!(e)));
        emit_event_best_effort(EventFields {
            level: "info",
            source: "acp-manager",
            action: "turn_canceled",
            session_key: Some(key.to_string()),
            result: Some(if result.is_ok() { "ok" } else { "error" }.to_string()),
            ..Default::default()
        });
        result
    }

    async fn resolve_backend_id_for(&self, key: &SessionKey) -> Option<String> {
        self.cache.peek(key).await.map(|c| c.backend_id)
    }

    /// Also runs outside `ActorQueue::run`, for the same reason as
    /// [`Self::cancel`]: it calls `cancel` itself when a turn is active,
    /// and nesting both under one actor-queue slot would deadlock.
    pub async fn close(
        &self,
        cfg: &ManagerConfig,
        session_key: &str,
        reason: &str,
        require_acp: bool,
        allow_backend_unavailable: bool,
    ) -> Result<CloseOutcome, AcpError> {
        self.evict_idle(cfg).await;
        let key = Self::normalize_key(session_key)?;

        if self.active_turns.get(&key).await.is_some() {
            self.cancel(cfg, session_key, reason).await?;
        }

        let Some(cached) = self.cache.peek(&key).await else {
            return if require_acp {
                Err(AcpError::new(ErrorCode::SessionInitFailed, "no session"))
            } else {
                Ok(CloseOutcome {
                    runtime_closed: false,
                    runtime_notice: None,
                    meta_cleared: false,
                })
            };
        };

        let mut runtime_notice = None;
        let mut runtime_closed = false;
        match self.registry.lookup(&cached.backend_id) {
            Some(descriptor) => match descriptor.runtime_ref.close(&cached.handle, reason).await {
                Ok(()) => runtime_closed = true,
                Err(e) if allow_backend_unavailable => {
                    runtime_notice = Some(format!("backend unavailable during close: {e}"));
                }
                Err(e) => return Err(AcpError::wrap(ErrorCode::BackendUnavailable, e)),
            },
            None if allow_backend_unavailable => {
                runtime_notice = Some("backend not registered during close".to_string());
            }
            None => {
                return Err(AcpError::new(
                    ErrorCode::BackendMissing,
                    "backend not registered",
                ))
            }
        }

        self.cache.clear(&key).await;
        tracing::info!(session_key = %key, reason, "session_closed");
        emit_event_best_effort(EventFields {
            level: "info",
            source: "acp-manager",
            action: "session_closed",
            session_key: Some(key.to_string()),
            backend: Some(cached.backend_id.clone()),
            result: Some(if runtime_closed { "ok" } else { "degraded" }.to_string()),
            ..Default::default()
        });

        Ok(CloseOutcome {
            runtime_closed,
            runtime_notice,
            meta_cleared: true,
        })
    }

    pub async fn observability(&self) -> Observability {
        let cache_snapshot = self.cache.snapshot().await;
        let stats = self.stats.lock().await;
        let turns = TurnsSnapshot {
            active_turns: self.active_turns.len().await,
            queue_depth: self.actor_queue.queue_depth().await,
            completed: stats.latency.completed,
            failed: stats.latency.failed,
            avg_latency_ms: stats.latency.avg_ms(),
            max_latency_ms: stats.latency.max_ms,
        };
        Observability {
            runtime_cache: cache_snapshot,
            turns,
            errors_by_code: stats.errors_by_code.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BackendDescriptor;
    use crate::test_support::MockBackend;

    fn manager_with_backend(blocking: bool) -> (SessionManager, Arc<MockBackend>) {
        let mut backend = MockBackend::new("mock");
        if blocking {
            backend = backend.blocking();
        }
        let backend = Arc::new(backend);
        let mut registry = BackendRegistry::new();
        registry
            .register(BackendDescriptor {
                id: "mock".to_string(),
                runtime_ref: backend.clone(),
                healthy: None,
            })
            .unwrap();
        (SessionManager::new(registry, 600_000), backend)
    }

    #[tokio::test]
    async fn cancel_cancels_a_running_turn() {
        let (manager, backend) = manager_with_backend(true);
        let cfg = ManagerConfig::default();
        manager
            .initialize(&cfg, "K", "main", SessionMode::Persistent, "/tmp", "mock")
            .await
            .unwrap();
        let _rx = manager.run_turn(&cfg, "K", "hi", TurnMode::Prompt, "r1").await.unwrap();

        let m1 = &manager;
        let (a, b) = tokio::join!(m1.cancel(&cfg, "K", "test"), m1.cancel(&cfg, "K", "test"));
        a.unwrap();
        b.unwrap();
        assert_eq!(backend.cancel_count(), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn close_cancels_active_turn_then_closes() {
        let (manager, backend) = manager_with_backend(true);
        let cfg = ManagerConfig::default();
        manager
            .initialize(&cfg, "K", "main", SessionMode::Persistent, "/tmp", "mock")
            .await
            .unwrap();
        let _rx = manager.run_turn(&cfg, "K", "hi", TurnMode::Prompt, "r1").await.unwrap();

        let outcome = manager.close(&cfg, "K", "close-test", false, false).await.unwrap();
        assert!(outcome.runtime_closed);
        assert_eq!(backend.cancel_count(), 1);
        assert_eq!(backend.close_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_run_turn_is_rejected() {
        let (manager, _backend) = manager_with_backend(true);
        let cfg = ManagerConfig::default();
        manager
            .initialize(&cfg, "K", "main", SessionMode::Persistent, "/tmp", "mock")
            .await
            .unwrap();
        let _rx = manager.run_turn(&cfg, "K", "hi", TurnMode::Prompt, "r1").await.unwrap();

        let err = manager
            .run_turn(&cfg, "K", "second", TurnMode::Prompt, "r2")
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TurnFailed);
        assert!(err.message.contains("already active"));
    }

    #[tokio::test]
    async fn session_limit_is_idempotent_for_the_same_key() {
        let (manager, _backend) = manager_with_backend(false);
        let mut cfg = ManagerConfig::default();
        cfg.max_concurrent_sessions = 1;

        manager
            .initialize(&cfg, "K", "main", SessionMode::Persistent, "/tmp", "mock")
            .await
            .unwrap();
        manager
            .initialize(&cfg, "K", "main", SessionMode::Persistent, "/tmp", "mock")
            .await
            .unwrap();

        let err = manager
            .initialize(&cfg, "L", "main", SessionMode::Persistent, "/tmp", "mock")
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionLimitReached);
    }

    #[tokio::test]
    async fn idle_eviction_clears_cache_and_closes_backend() {
        let (manager, backend) = manager_with_backend(false);
        let mut cfg = ManagerConfig::default();
        cfg.idle_timeout_ms = 50;

        manager
            .initialize(&cfg, "K", "main", SessionMode::Persistent, "/tmp", "mock")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.evict_idle(&cfg).await;

        let snapshot = manager.observability().await;
        assert_eq!(snapshot.runtime_cache.active_sessions, 0);
        assert_eq!(snapshot.runtime_cache.evicted_total, 1);
        assert_eq!(backend.close_count(), 1);
    }
}
