//! The stdio JSON-RPC runtime backend (spec.md §4.6).
//!
//! One [`StdioBackend`] instance manages zero or more spawned agent
//! processes, one per `session_key`. Each process has a dedicated reader
//! task that demultiplexes JSON-RPC responses (matched by id, via
//! [`crate::rpc::PendingRequests`]) from `session/update` notifications,
//! which are forwarded to whichever channel `run_turn` currently has
//! installed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use acp_manager::error::ErrorCode;
use acp_manager::events::AcpEvent;
use acp_manager::registry::{BackendControlError, DoctorReport, RuntimeBackend};
use acp_manager::types::{RuntimeHandle, TurnMode};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::AgentSpawnConfig;
use crate::event_parse::dispatch_line;
use crate::framing::{write_newline_delimited, UpstreamReader};
use crate::process::{self, ChildIo};
use crate::rpc::{next_request_id, PendingRequests};

/// The parts of a spawned agent's I/O that outlive the reader task: the
/// shared stdin writer and the process handle for force-kill on close.
/// `stdout` is consumed by the reader task at spawn time and has no home
/// here.
struct IoHandles {
    stdin: Arc<Mutex<Box<dyn tokio::io::AsyncWrite + Send + Unpin>>>,
    process: Arc<Mutex<Option<tokio::process::Child>>>,
}

struct SessionProcess {
    io: IoHandles,
    pending: Arc<Mutex<PendingRequests>>,
    event_sink: Arc<Mutex<Option<tokio::sync::mpsc::Sender<AcpEvent>>>>,
    agent_session_id: String,
}

/// Runtime backend that spawns a configured agent executable per session
/// and speaks newline-delimited JSON-RPC over its stdio pipes.
#[derive(Debug)]
pub struct StdioBackend {
    id: String,
    config: AgentSpawnConfig,
    sessions: Mutex<HashMap<String, Arc<SessionProcess>>>,
}

impl std::fmt::Debug for SessionProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionProcess")
            .field("agent_session_id", &self.agent_session_id)
            .finish()
    }
}

impl StdioBackend {
    pub fn new(id: impl Into<String>, config: AgentSpawnConfig) -> Self {
        Self {
            id: id.into(),
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    async fn send_request(
        io: &IoHandles,
        pending: &Arc<Mutex<PendingRequests>>,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> anyhow::Result<Value> {
        let id = next_request_id();
        let rx = pending.lock().await.register(id);
        let payload = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        {
            let mut stdin = io.stdin.lock().await;
            write_newline_delimited(&mut *stdin, &payload.to_string()).await?;
        }
        let response = tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for response to {method}"))?
            .map_err(|_| anyhow::anyhow!("response channel for {method} closed"))?;
        if let Some(error) = response.get("error") {
            anyhow::bail!("agent returned error for {method}: {error}");
        }
        Ok(response)
    }

    async fn send_notification(io: &IoHandles, method: &str, params: Value) -> anyhow::Result<()> {
        let payload = json!({"jsonrpc": "2.0", "method": method, "params": params});
        let mut stdin = io.stdin.lock().await;
        write_newline_delimited(&mut *stdin, &payload.to_string()).await
    }

    fn spawn_reader_task(
        mut reader: UpstreamReader<Box<dyn tokio::io::AsyncRead + Send + Unpin>>,
        pending: Arc<Mutex<PendingRequests>>,
        event_sink: Arc<Mutex<Option<tokio::sync::mpsc::Sender<AcpEvent>>>>,
    ) {
        tokio::spawn(async move {
            loop {
                let line = match reader.next_message().await {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        tracing::info!("agent stdout closed, reader task exiting");
                        if let Some(sink) = event_sink.lock().await.take() {
                            let _ = sink
                                .send(AcpEvent::Done {
                                    stop_reason: "completed".to_string(),
                                })
                                .await;
                        }
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to read agent stdout");
                        if let Some(sink) = event_sink.lock().await.as_ref() {
                            let _ = sink
                                .send(AcpEvent::Error {
                                    code: ErrorCode::TurnFailed,
                                    message: "scanner error reading agent stdout".to_string(),
                                })
                                .await;
                        }
                        break;
                    }
                };
                let value: Value = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if let Some(id) = value.get("id").and_then(|v| v.as_i64()) {
                    if pending.lock().await.resolve(id, value.clone()) {
                        continue;
                    }
                }
                if let Some(event) = dispatch_line(&value) {
                    if let Some(sink) = event_sink.lock().await.as_ref() {
                        let _ = sink.send(event).await;
                    }
                }
            }
        });
    }

    async fn spawn_session(&self, cwd: &str) -> anyhow::Result<SessionProcess> {
        tracing::info!(backend = %self.id, cwd, "spawning agent process");
        let ChildIo {
            stdin,
            stdout,
            exit_status: _,
            process,
        } = process::spawn(&self.config, cwd).await.inspect_err(|e| {
            tracing::error!(backend = %self.id, error = %e, "failed to spawn agent process");
        })?;
        let io = IoHandles { stdin, process };
        let pending = Arc::new(Mutex::new(PendingRequests::new()));
        let event_sink = Arc::new(Mutex::new(None));

        let reader = UpstreamReader::new(stdout);
        Self::spawn_reader_task(reader, pending.clone(), event_sink.clone());

        Self::send_request(
            &io,
            &pending,
            "initialize",
            json!({
                "protocolVersion": "1",
                "capabilities": {"roots": {"list": true}},
                "clientInfo": {"name": "acp-manager", "version": env!("CARGO_PKG_VERSION")},
            }),
            self.config.request_timeout,
        )
        .await?;

        let agent_session_id = uuid::Uuid::new_v4().to_string();
        Self::send_request(
            &io,
            &pending,
            "session/new",
            json!({"sessionId": agent_session_id}),
            self.config.request_timeout,
        )
        .await?;

        Ok(SessionProcess {
            io,
            pending,
            event_sink,
            agent_session_id,
        })
    }
}

#[async_trait::async_trait]
impl RuntimeBackend for StdioBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn ensure_session(
        &self,
        session_key: &str,
        _agent: &str,
        cwd: &str,
    ) -> anyhow::Result<RuntimeHandle> {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(session_key) {
            return Ok(RuntimeHandle {
                session_key: session_key.to_string(),
                backend_id: self.id.clone(),
                runtime_session_name: existing.agent_session_id.clone(),
                cwd: cwd.to_string(),
                backend_session_id: existing.agent_session_id.clone(),
                agent_session_id: existing.agent_session_id.clone(),
                backend_record_id: session_key.to_string(),
            });
        }

        let session = self.spawn_session(cwd).await?;
        let handle = RuntimeHandle {
            session_key: session_key.to_string(),
            backend_id: self.id.clone(),
            runtime_session_name: session.agent_session_id.clone(),
            cwd: cwd.to_string(),
            backend_session_id: session.agent_session_id.clone(),
            agent_session_id: session.agent_session_id.clone(),
            backend_record_id: session_key.to_string(),
        };
        sessions.insert(session_key.to_string(), Arc::new(session));
        Ok(handle)
    }

    async fn run_turn(
        &self,
        handle: &RuntimeHandle,
        text: &str,
        mode: TurnMode,
        _request_id: &str,
        cancel: CancellationToken,
    ) -> anyhow::Result<tokio::sync::mpsc::Receiver<AcpEvent>> {
        let session = self.session_for(handle).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        *session.event_sink.lock().await = Some(tx);

        let mode_str = match mode {
            TurnMode::Prompt => "prompt",
            TurnMode::Steer => "steer",
        };
        let id = next_request_id();
        let response_rx = session.pending.lock().await.register(id);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "session/prompt",
            "params": {
                "sessionId": session.agent_session_id,
                "prompt": {"text": text, "mode": mode_str},
            },
        });
        {
            let mut stdin = session.io.stdin.lock().await;
            write_newline_delimited(&mut *stdin, &payload.to_string()).await?;
        }

        // The prompt's own JSON-RPC response (matched by `id`) is the
        // per-turn terminal signal: close the installed sink once it
        // arrives so `pump_turn_events` sees the stream end and the next
        // `run_turn` on this session isn't rejected as "already active".
        let event_sink = session.event_sink.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // `cancel()` owns tearing down the sink and notifying
                    // the agent process; nothing to do here.
                }
                result = response_rx => {
                    let stop_reason = result
                        .ok()
                        .and_then(|value| {
                            value
                                .get("result")
                                .and_then(|r| r.get("stopReason"))
                                .and_then(|s| s.as_str())
                                .map(str::to_string)
                        })
                        .unwrap_or_else(|| "completed".to_string());
                    if let Some(sink) = event_sink.lock().await.take() {
                        let _ = sink.send(AcpEvent::Done { stop_reason }).await;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn set_mode(&self, handle: &RuntimeHandle, mode: &str) -> Result<(), BackendControlError> {
        let session = self
            .session_for(handle)
            .await
            .map_err(BackendControlError::Other)?;
        Self::send_request(
            &session.io,
            &session.pending,
            "session/set_mode",
            json!({"sessionId": session.agent_session_id, "mode": mode}),
            self.config.request_timeout,
        )
        .await
        .map(|_| ())
        .map_err(BackendControlError::Other)
    }

    async fn set_config_option(
        &self,
        handle: &RuntimeHandle,
        key: &str,
        value: Value,
    ) -> Result<(), BackendControlError> {
        let session = self
            .session_for(handle)
            .await
            .map_err(BackendControlError::Other)?;
        Self::send_request(
            &session.io,
            &session.pending,
            "session/set_config_option",
            json!({"sessionId": session.agent_session_id, "key": key, "value": value}),
            self.config.request_timeout,
        )
        .await
        .map(|_| ())
        .map_err(BackendControlError::Other)
    }

    async fn cancel(&self, handle: &RuntimeHandle, reason: &str) -> anyhow::Result<()> {
        tracing::debug!(session_key = %handle.session_key, reason, "canceling turn");
        let session = self.session_for(handle).await?;
        Self::send_notification(
            &session.io,
            "session/cancel",
            json!({"sessionId": session.agent_session_id, "reason": reason}),
        )
        .await?;
        if let Some(sink) = session.event_sink.lock().await.take() {
            let _ = sink
                .send(AcpEvent::Error {
                    code: ErrorCode::TurnCanceled,
                    message: reason.to_string(),
                })
                .await;
        }
        Ok(())
    }

    async fn close(&self, handle: &RuntimeHandle, reason: &str) -> anyhow::Result<()> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.remove(&handle.session_key) else {
            tracing::debug!(session_key = %handle.session_key, "close called for unknown session");
            return Ok(());
        };
        tracing::info!(session_key = %handle.session_key, reason, "closing agent process");
        let _ = Self::send_notification(
            &session.io,
            "session/cancel",
            json!({"sessionId": session.agent_session_id, "reason": reason}),
        )
        .await;
        let mut process = session.io.process.lock().await;
        if let Some(mut child) = process.take() {
            let _ = child.kill().await;
        }
        Ok(())
    }

    async fn doctor(&self) -> DoctorReport {
        match process::doctor(&self.config) {
            process::DoctorOutcome::Ok => DoctorReport { ok: true, code: None },
            process::DoctorOutcome::Missing => DoctorReport {
                ok: false,
                code: Some(ErrorCode::BackendMissing),
            },
            process::DoctorOutcome::Unavailable => DoctorReport {
                ok: false,
                code: Some(ErrorCode::BackendUnavailable),
            },
        }
    }
}

impl StdioBackend {
    async fn session_for(&self, handle: &RuntimeHandle) -> anyhow::Result<Arc<SessionProcess>> {
        self.sessions
            .lock()
            .await
            .get(&handle.session_key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no stdio session for key {}", handle.session_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doctor_reflects_process_doctor_outcome() {
        let backend = StdioBackend::new("stdio", AgentSpawnConfig::new("/no/such/agent-binary"));
        assert_eq!(backend.id(), "stdio");
    }
}
