//! Translates raw JSON-RPC lines from an agent's stdout into typed
//! [`AcpEvent`]s (spec.md §4.6).

use acp_manager::error::ErrorCode;
use acp_manager::events::{AcpEvent, TextStream, ToolCallEvent};
use serde_json::Value;

use crate::tool_names::map_tool_name;

/// Dispatch one already-parsed JSON-RPC line. Returns `None` for messages
/// that carry no event for the turn stream (e.g. a bare response to an
/// unrelated request).
pub fn dispatch_line(value: &Value) -> Option<AcpEvent> {
    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("agent returned an error response")
            .to_string();
        return Some(AcpEvent::Error {
            code: ErrorCode::TurnFailed,
            message,
        });
    }

    let method = value.get("method").and_then(|m| m.as_str());
    if method != Some("session/update") {
        return None;
    }
    let update = value.get("params")?.get("update")?;
    parse_session_update(update)
}

fn parse_session_update(update: &Value) -> Option<AcpEvent> {
    let kind = update.get("sessionUpdate").and_then(|k| k.as_str())?;
    match kind {
        "agent_message_chunk" | "user_message_chunk" => Some(AcpEvent::TextDelta {
            stream: TextStream::Output,
            text: chunk_text(update),
        }),
        "agent_thought_chunk" => Some(AcpEvent::TextDelta {
            stream: TextStream::Thought,
            text: chunk_text(update),
        }),
        "tool_call" => Some(AcpEvent::ToolCall(ToolCallEvent {
            id: update.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            name: update
                .get("name")
                .and_then(|v| v.as_str())
                .map(map_tool_name),
            arguments: update.get("arguments").cloned(),
            status: update
                .get("status")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            text: None,
        })),
        "tool_call_update" => Some(AcpEvent::ToolCall(ToolCallEvent {
            id: update.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            name: None,
            arguments: None,
            status: update
                .get("status")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            text: update
                .get("text")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })),
        _ => {
            let text = chunk_text(update);
            if text.is_empty() {
                None
            } else {
                Some(AcpEvent::TextDelta {
                    stream: TextStream::Output,
                    text,
                })
            }
        }
    }
}

fn chunk_text(update: &Value) -> String {
    update
        .get("content")
        .and_then(|c| c.get("text"))
        .and_then(|t| t.as_str())
        .or_else(|| update.get("text").and_then(|t| t.as_str()))
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_response_yields_turn_failed() {
        let value = json!({"jsonrpc": "2.0", "id": 1, "error": {"message": "boom"}});
        let event = dispatch_line(&value).unwrap();
        assert!(matches!(event, AcpEvent::Error { code: ErrorCode::TurnFailed, .. }));
    }

    #[test]
    fn agent_message_chunk_is_output_text_delta() {
        let value = json!({
            "method": "session/update",
            "params": {"sessionId": "s1", "update": {
                "sessionUpdate": "agent_message_chunk",
                "content": {"text": "hello"}
            }}
        });
        let event = dispatch_line(&value).unwrap();
        match event {
            AcpEvent::TextDelta { stream, text } => {
                assert_eq!(stream, TextStream::Output);
                assert_eq!(text, "hello");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn agent_thought_chunk_is_thought_text_delta() {
        let value = json!({
            "method": "session/update",
            "params": {"update": {"sessionUpdate": "agent_thought_chunk", "text": "thinking"}}
        });
        let event = dispatch_line(&value).unwrap();
        match event {
            AcpEvent::TextDelta { stream, text } => {
                assert_eq!(stream, TextStream::Thought);
                assert_eq!(text, "thinking");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn tool_call_maps_name_through_tool_names_table() {
        let value = json!({
            "method": "session/update",
            "params": {"update": {
                "sessionUpdate": "tool_call",
                "id": "t1",
                "name": "bash",
                "arguments": {"cmd": "ls"},
                "status": "pending"
            }}
        });
        let event = dispatch_line(&value).unwrap();
        match event {
            AcpEvent::ToolCall(call) => {
                assert_eq!(call.id, "t1");
                assert_eq!(call.name.as_deref(), Some("run_shell"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn tool_call_update_carries_status_and_text() {
        let value = json!({
            "method": "session/update",
            "params": {"update": {
                "sessionUpdate": "tool_call_update",
                "id": "t1",
                "status": "completed",
                "text": "done"
            }}
        });
        let event = dispatch_line(&value).unwrap();
        match event {
            AcpEvent::ToolCall(call) => {
                assert_eq!(call.status.as_deref(), Some("completed"));
                assert_eq!(call.text.as_deref(), Some("done"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_update_with_content_falls_back_to_output_delta() {
        let value = json!({
            "method": "session/update",
            "params": {"update": {"sessionUpdate": "something_new", "text": "raw"}}
        });
        let event = dispatch_line(&value).unwrap();
        assert!(matches!(event, AcpEvent::TextDelta { stream: TextStream::Output, .. }));
    }

    #[test]
    fn unknown_update_with_no_content_is_ignored() {
        let value = json!({
            "method": "session/update",
            "params": {"update": {"sessionUpdate": "something_new"}}
        });
        assert!(dispatch_line(&value).is_none());
    }

    #[test]
    fn non_session_update_method_is_ignored() {
        let value = json!({"method": "other/thing", "params": {}});
        assert!(dispatch_line(&value).is_none());
    }
}
