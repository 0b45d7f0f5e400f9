//! A `RuntimeBackend` test double, public so both this crate's unit tests
//! and `tests/integration.rs` can drive a `SessionManager` without a real
//! agent process (modeled on `atm-agent-mcp::transport::MockTransport`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::events::{AcpEvent, TextStream};
use crate::registry::{BackendControlError, RuntimeBackend};
use crate::types::{RuntimeHandle, TurnMode};

/// A backend whose behavior is controlled by its construction flags rather
/// than by inspecting call arguments.
#[derive(Debug)]
pub struct MockBackend {
    id: &'static str,
    pub cancel_calls: Arc<AtomicU64>,
    pub close_calls: Arc<AtomicU64>,
    /// When true, `run_turn` never completes on its own (simulates a turn in
    /// flight until canceled).
    pub blocking: bool,
    /// When true, `run_turn` fails immediately instead of returning a
    /// receiver (simulates a backend that can't start the agent process).
    pub fail_run_turn: bool,
}

impl MockBackend {
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            cancel_calls: Arc::new(AtomicU64::new(0)),
            close_calls: Arc::new(AtomicU64::new(0)),
            blocking: false,
            fail_run_turn: false,
        }
    }

    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub fn failing_run_turn(mut self) -> Self {
        self.fail_run_turn = true;
        self
    }

    pub fn cancel_count(&self) -> u64 {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u64 {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RuntimeBackend for MockBackend {
    fn id(&self) -> &str {
        self.id
    }

    async fn ensure_session(
        &self,
        session_key: &str,
        agent: &str,
        cwd: &str,
    ) -> anyhow::Result<RuntimeHandle> {
        Ok(RuntimeHandle {
            session_key: session_key.to_string(),
            backend_id: self.id.to_string(),
            runtime_session_name: format!("{agent}-session"),
            cwd: cwd.to_string(),
            ..Default::default()
        })
    }

    async fn run_turn(
        &self,
        _handle: &RuntimeHandle,
        text: &str,
        _mode: TurnMode,
        _request_id: &str,
        cancel: CancellationToken,
    ) -> anyhow::Result<tokio::sync::mpsc::Receiver<AcpEvent>> {
        if self.fail_run_turn {
            anyhow::bail!("mock backend refused to start the agent process");
        }
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let blocking = self.blocking;
        let text = text.to_string();
        tokio::spawn(async move {
            if blocking {
                // Simulates a backend whose turn loop awaits context
                // cancellation: the stream ends (tx drops) as soon as
                // `cancel` fires, instead of running to the 3600s sleep.
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(3600)) => {}
                    _ = cancel.cancelled() => {}
                }
            } else {
                let _ = tx
                    .send(AcpEvent::TextDelta {
                        stream: TextStream::Output,
                        text,
                    })
                    .await;
                let _ = tx
                    .send(AcpEvent::Done {
                        stop_reason: "completed".to_string(),
                    })
                    .await;
            }
        });
        Ok(rx)
    }

    async fn set_mode(&self, _handle: &RuntimeHandle, _mode: &str) -> Result<(), BackendControlError> {
        Ok(())
    }

    async fn set_config_option(
        &self,
        _handle: &RuntimeHandle,
        _key: &str,
        _value: serde_json::Value,
    ) -> Result<(), BackendControlError> {
        Ok(())
    }

    async fn cancel(&self, _handle: &RuntimeHandle, _reason: &str) -> anyhow::Result<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self, _handle: &RuntimeHandle, _reason: &str) -> anyhow::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
