//! End-to-end `SessionManager` scenarios against a `MockBackend`, run
//! through the crate's public surface the way a caller would.

use std::time::Duration;

use acp_manager::config::ManagerConfig;
use acp_manager::error::ErrorCode;
use acp_manager::registry::BackendDescriptor;
use acp_manager::test_support::MockBackend;
use acp_manager::types::{SessionMode, TurnMode};
use acp_manager::{BackendRegistry, SessionManager};
use std::sync::Arc;

fn manager_with(backend: MockBackend) -> (SessionManager, Arc<MockBackend>) {
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
async fn scenario_1_cancel_cancels_a_running_turn() {
    let (manager, backend) = manager_with(MockBackend::new("mock").blocking());
    let cfg = ManagerConfig::default();
    manager
        .initialize(&cfg, "K", "main", SessionMode::Persistent, "/tmp", "mock")
        .await
        .unwrap();
    let _rx = manager.run_turn(&cfg, "K", "hi", TurnMode::Prompt, "r1").await.unwrap();

    let (a, b) = tokio::join!(manager.cancel(&cfg, "K", "test"), manager.cancel(&cfg, "K", "test"));
    a.unwrap();
    b.unwrap();
    assert_eq!(backend.cancel_count(), 1);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let snapshot = manager.observability().await;
    assert_eq!(snapshot.turns.active_turns, 0);
}

#[tokio::test]
async fn scenario_2_spawn_failure_cleans_up() {
    let (manager, backend) = manager_with(MockBackend::new("mock").failing_run_turn());
    let cfg = ManagerConfig::default();
    manager
        .initialize(&cfg, "K", "main", SessionMode::Persistent, "/tmp", "mock")
        .await
        .unwrap();

    let err = manager
        .run_turn(&cfg, "K", "hi", TurnMode::Prompt, "r1")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::TurnFailed);

    manager
        .close(&cfg, "K", "spawn-failed", false, false)
        .await
        .unwrap();
    assert!(backend.close_count() >= 1);
}

#[tokio::test]
async fn scenario_3_close_cancels_active_turn() {
    let (manager, backend) = manager_with(MockBackend::new("mock").blocking());
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
async fn scenario_4_concurrent_run_turn_rejected() {
    let (manager, _backend) = manager_with(MockBackend::new("mock").blocking());
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
async fn scenario_5_session_limit_idempotence() {
    let (manager, _backend) = manager_with(MockBackend::new("mock"));
    let mut cfg = ManagerConfig::default();
    cfg.max_concurrent_sessions = 1;

    let first = manager
        .initialize(&cfg, "K", "main", SessionMode::Persistent, "/tmp", "mock")
        .await
        .unwrap();
    let second = manager
        .initialize(&cfg, "K", "main", SessionMode::Persistent, "/tmp", "mock")
        .await
        .unwrap();
    assert_eq!(first.backend, second.backend);

    let err = manager
        .initialize(&cfg, "L", "main", SessionMode::Persistent, "/tmp", "mock")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::SessionLimitReached);
}

#[tokio::test]
async fn scenario_6_idle_eviction() {
    let (manager, backend) = manager_with(MockBackend::new("mock"));
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
