//! Integration tests exercising real subprocess spawning and
//! newline-delimited JSON-RPC framing end-to-end. Uses `cat` as a stand-in
//! agent: it echoes every line back verbatim, so a request comes back as
//! its own id with no `error` field, which the adapter treats as success.
//! This is enough to exercise spawn/initialize/session-new without
//! depending on a real agent binary or a scripting interpreter.

use std::time::Duration;

use acp_manager::registry::RuntimeBackend;
use acp_stdio::{AgentSpawnConfig, StdioBackend};

fn cat_backend() -> StdioBackend {
    let config = AgentSpawnConfig::new("cat").with_request_timeout(Duration::from_secs(5));
    StdioBackend::new("stdio-cat", config)
}

#[tokio::test]
async fn ensure_session_spawns_and_completes_handshake() {
    let backend = cat_backend();
    let handle = backend
        .ensure_session("session-a", "main", "/tmp")
        .await
        .expect("ensure_session should succeed against an echo process");
    assert_eq!(handle.session_key, "session-a");
    assert_eq!(handle.backend_id, "stdio-cat");
    assert!(!handle.agent_session_id.is_empty());
}

#[tokio::test]
async fn ensure_session_is_idempotent_for_the_same_key() {
    let backend = cat_backend();
    let first = backend.ensure_session("session-b", "main", "/tmp").await.unwrap();
    let second = backend.ensure_session("session-b", "main", "/tmp").await.unwrap();
    assert_eq!(first.agent_session_id, second.agent_session_id);
}

#[tokio::test]
async fn close_is_a_no_op_for_an_unknown_handle() {
    let backend = cat_backend();
    let handle = acp_manager::types::RuntimeHandle {
        session_key: "never-initialized".to_string(),
        backend_id: "stdio-cat".to_string(),
        ..Default::default()
    };
    backend.close(&handle, "cleanup").await.unwrap();
}

#[tokio::test]
async fn doctor_reports_missing_for_a_nonexistent_executable() {
    let config = AgentSpawnConfig::new("/no/such/agent-binary-zz");
    let backend = StdioBackend::new("stdio-missing", config);
    let report = backend.doctor().await;
    assert!(!report.ok);
}
