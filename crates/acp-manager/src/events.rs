//! Turn event stream types (spec.md §9 redesign flag: a sum type rather
//! than an open interface with marker methods).

use crate::error::ErrorCode;

/// One event in the stream returned by `runTurn`.
#[derive(Debug, Clone)]
pub enum AcpEvent {
    TextDelta { stream: TextStream, text: String },
    Status { detail: String },
    ToolCall(ToolCallEvent),
    Done { stop_reason: String },
    Error { code: ErrorCode, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextStream {
    Output,
    Thought,
}

#[derive(Debug, Clone)]
pub struct ToolCallEvent {
    pub id: String,
    pub name: Option<String>,
    pub arguments: Option<serde_json::Value>,
    pub status: Option<String>,
    pub text: Option<String>,
}

impl AcpEvent {
    /// The [`ErrorCode`] this event should contribute to per-code error
    /// counters, if any (spec.md §7: "Turn-level errors reported as
    /// `ErrorEvent`... increment per-code counters").
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            AcpEvent::Error { code, .. } => Some(*code),
            _ => None,
        }
    }
}
