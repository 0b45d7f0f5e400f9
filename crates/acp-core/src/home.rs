//! Canonical home directory resolution.
//!
//! Single source of truth for where `acp-core`'s log/event sinks default to.
//! Consistent across platforms and overridable for tests via `ACP_HOME`.
//!
//! # Precedence
//!
//! 1. `ACP_HOME` environment variable (if set and non-empty)
//! 2. `dirs::home_dir()` platform default

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Resolve the effective home directory for `acp-core` state.
///
/// # Errors
///
/// Returns an error if `ACP_HOME` is unset and the platform home directory
/// cannot be determined via `dirs::home_dir()`.
pub fn get_home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("ACP_HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    dirs::home_dir().context("could not determine home directory")
}
