//! Session identity reconciliation (spec.md §3: `SessionIdentity`).

use crate::types::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityState {
    Pending,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    Ensure,
    Status,
}

/// A state machine over `{pending, resolved}` tracking how much of a
/// session's backend-assigned identity is known.
///
/// Transitions only move forward: `pending -> resolved`, never back. Once
/// resolved, identifiers may only be filled in, never overwritten with a
/// different non-empty value (spec.md §3 invariant).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub state: IdentityState,
    pub source: IdentitySource,
    pub backend_session_id: String,
    pub agent_session_id: String,
    pub last_updated_at: i64,
}

impl SessionIdentity {
    pub fn pending(source: IdentitySource) -> Self {
        Self {
            state: IdentityState::Pending,
            source,
            backend_session_id: String::new(),
            agent_session_id: String::new(),
            last_updated_at: now_ms(),
        }
    }

    /// Derive resolved state from whichever identifiers are non-empty.
    pub fn from_handle(
        source: IdentitySource,
        backend_session_id: impl Into<String>,
        agent_session_id: impl Into<String>,
    ) -> Self {
        let backend_session_id = backend_session_id.into();
        let agent_session_id = agent_session_id.into();
        let state = if backend_session_id.is_empty() && agent_session_id.is_empty() {
            IdentityState::Pending
        } else {
            IdentityState::Resolved
        };
        Self {
            state,
            source,
            backend_session_id,
            agent_session_id,
            last_updated_at: now_ms(),
        }
    }

    /// Merge an incoming identity fragment into `self`, per spec.md §3:
    /// a resolved incoming identity always wins; otherwise the more recent
    /// pending one wins; `last_updated_at` is always bumped to `now`.
    pub fn merge(&self, incoming: Option<&SessionIdentity>, now: i64) -> Self {
        let mut merged = match incoming {
            None => self.clone(),
            Some(incoming) if incoming.state == IdentityState::Resolved => incoming.clone(),
            Some(incoming) => {
                if self.state == IdentityState::Resolved {
                    self.clone()
                } else if incoming.last_updated_at >= self.last_updated_at {
                    incoming.clone()
                } else {
                    self.clone()
                }
            }
        };
        merged.last_updated_at = now;
        merged
    }
}
