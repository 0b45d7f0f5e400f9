//! Error taxonomy shared across the registry, cache, actor queue, manager,
//! and runtime backends (spec.md §7).

use std::fmt;

/// Stable error codes surfaced to callers of the session manager.
///
/// Backend adapters that already know the precise code (e.g.
/// [`ErrorCode::BackendUnsupportedControl`]) should construct an
/// [`AcpError`] with that code directly rather than letting a generic
/// wrapper reassign it — see [`AcpError::wrap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    BackendMissing,
    BackendUnavailable,
    BackendUnsupportedControl,
    SessionInitFailed,
    SessionNotFound,
    SessionLimitReached,
    InvalidSessionKey,
    TurnFailed,
    TurnCanceled,
    AgentUnauthorized,
    PolicyDisabled,
    ThreadBindingDisabled,
    ThreadBindingSpawnDisabled,
    ThreadBindingFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BackendMissing => "BACKEND_MISSING",
            Self::BackendUnavailable => "BACKEND_UNAVAILABLE",
            Self::BackendUnsupportedControl => "BACKEND_UNSUPPORTED_CONTROL",
            Self::SessionInitFailed => "SESSION_INIT_FAILED",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionLimitReached => "SESSION_LIMIT_REACHED",
            Self::InvalidSessionKey => "INVALID_SESSION_KEY",
            Self::TurnFailed => "TURN_FAILED",
            Self::TurnCanceled => "TURN_CANCELED",
            Self::AgentUnauthorized => "AGENT_UNAUTHORIZED",
            Self::PolicyDisabled => "POLICY_DISABLED",
            Self::ThreadBindingDisabled => "THREAD_BINDING_DISABLED",
            Self::ThreadBindingSpawnDisabled => "THREAD_BINDING_SPAWN_DISABLED",
            Self::ThreadBindingFailed => "THREAD_BINDING_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single typed error carrying a stable [`ErrorCode`], a human-readable
/// message, and an optional underlying cause.
#[derive(Debug)]
pub struct AcpError {
    pub code: ErrorCode,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl AcpError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an arbitrary error (e.g. from a backend or I/O boundary) with
    /// `code`, unless it already carries its own [`ErrorCode`] — in which
    /// case the original code is preserved (spec.md §7: "errors from backend
    /// calls are wrapped ... unless they already carry one").
    pub fn wrap(code: ErrorCode, err: impl Into<anyhow::Error>) -> Self {
        let err = err.into();
        if let Some(existing) = err.downcast_ref::<AcpError>() {
            return Self {
                code: existing.code,
                message: existing.message.clone(),
                source: None,
            };
        }
        Self {
            code,
            message: err.to_string(),
            source: None,
        }
    }

    pub fn session_limit_reached(current: usize, max: usize) -> Self {
        Self::new(
            ErrorCode::SessionLimitReached,
            format!("session limit reached: {current}/{max} active sessions"),
        )
    }

    pub fn already_active() -> Self {
        Self::new(ErrorCode::TurnFailed, "already active")
    }

    pub fn unsupported_control(control: &str) -> Self {
        Self::new(
            ErrorCode::BackendUnsupportedControl,
            format!("backend does not support control \"{control}\""),
        )
    }
}

impl fmt::Display for AcpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AcpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

pub type AcpResult<T> = Result<T, AcpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_preserves_existing_code() {
        let inner = AcpError::new(ErrorCode::BackendUnsupportedControl, "nope");
        let wrapped = AcpError::wrap(ErrorCode::SessionInitFailed, anyhow::Error::new(inner));
        assert_eq!(wrapped.code, ErrorCode::BackendUnsupportedControl);
    }

    #[test]
    fn wrap_assigns_code_for_foreign_error() {
        let io_err = std::io::Error::other("boom");
        let wrapped = AcpError::wrap(ErrorCode::SessionInitFailed, anyhow::Error::new(io_err));
        assert_eq!(wrapped.code, ErrorCode::SessionInitFailed);
        assert!(wrapped.message.contains("boom"));
    }

    #[test]
    fn already_active_message_matches_spec() {
        let e = AcpError::already_active();
        assert_eq!(e.code, ErrorCode::TurnFailed);
        assert!(e.message.contains("already active"));
    }
}
