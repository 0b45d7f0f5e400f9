//! Manager configuration (SPEC_FULL.md §4.9).
//!
//! Every field has a default so a minimal or absent `[acp]` table still
//! produces a fully-functional config, mirroring the teacher's
//! default-function-per-field convention.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_agent() -> String {
    "main".to_string()
}

fn default_max_concurrent_sessions() -> usize {
    0
}

fn default_idle_timeout_ms() -> u64 {
    600_000
}

fn default_agent_path() -> String {
    "acp-agent".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Root configuration for the session manager, loaded from an optional
/// `[acp]` TOML table (plus an inert `[thread_binding]` table carried only
/// as a seam for an out-of-scope external collaborator).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub enabled: bool,
    pub backend: Option<String>,
    pub default_agent: String,
    pub allowed_agents: Vec<String>,
    pub max_concurrent_sessions: usize,
    pub idle_timeout_ms: u64,
    pub agent_path: String,
    pub agent_args: Vec<String>,
    pub agent_env: Vec<(String, String)>,
    pub request_timeout_secs: u64,
    pub thread_binding: ThreadBindingConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            backend: None,
            default_agent: default_agent(),
            allowed_agents: Vec::new(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            idle_timeout_ms: default_idle_timeout_ms(),
            agent_path: default_agent_path(),
            agent_args: Vec::new(),
            agent_env: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
            thread_binding: ThreadBindingConfig::default(),
        }
    }
}

/// Out-of-scope functionally (spec.md §1): carried only as inert
/// configuration plus a trait seam, per a caller's own thread-binding
/// collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadBindingConfig {
    pub enabled: bool,
    pub spawn_enabled: bool,
    pub idle_timeout_ms: u64,
    pub max_age_ms: u64,
}

impl Default for ThreadBindingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            spawn_enabled: false,
            idle_timeout_ms: default_idle_timeout_ms(),
            max_age_ms: 0,
        }
    }
}

impl ManagerConfig {
    /// Parse a `[acp]` TOML table, falling back to defaults for any
    /// missing field. An empty or absent document still yields a fully
    /// functional config.
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        #[derive(Deserialize, Default)]
        struct Root {
            #[serde(default)]
            acp: ManagerConfig,
        }
        let root: Root = toml::from_str(raw)?;
        Ok(root.acp)
    }

    /// Layer `ACP_*` environment variable overrides on top of a base
    /// config, matching the teacher's `apply_env_overrides` pattern: empty
    /// string values are treated as "unset" and skipped.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(v) = non_empty_env("ACP_BACKEND") {
            self.backend = Some(v);
        }
        if let Some(v) = non_empty_env("ACP_DEFAULT_AGENT") {
            self.default_agent = v;
        }
        if let Some(v) = non_empty_env("ACP_AGENT_PATH") {
            self.agent_path = v;
        }
        if let Some(v) = non_empty_env("ACP_MAX_CONCURRENT_SESSIONS") {
            if let Ok(parsed) = v.parse() {
                self.max_concurrent_sessions = parsed;
            }
        }
        if let Some(v) = non_empty_env("ACP_IDLE_TIMEOUT_MS") {
            if let Ok(parsed) = v.parse() {
                self.idle_timeout_ms = parsed;
            }
        }
        if let Some(v) = non_empty_env("ACP_ENABLED") {
            self.enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        self
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn absent_document_yields_functional_defaults() {
        let cfg = ManagerConfig::from_toml_str("").unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.default_agent, "main");
        assert_eq!(cfg.max_concurrent_sessions, 0);
        assert_eq!(cfg.idle_timeout_ms, 600_000);
    }

    #[test]
    fn partial_table_fills_unspecified_fields_with_defaults() {
        let cfg = ManagerConfig::from_toml_str(
            r#"
            [acp]
            backend = "stdio"
            max_concurrent_sessions = 4
            "#,
        )
        .unwrap();
        assert_eq!(cfg.backend.as_deref(), Some("stdio"));
        assert_eq!(cfg.max_concurrent_sessions, 4);
        assert_eq!(cfg.idle_timeout_ms, 600_000);
    }

    #[test]
    #[serial]
    fn env_overrides_apply_on_top_of_file_config() {
        unsafe {
            std::env::set_var("ACP_BACKEND", "override-backend");
            std::env::set_var("ACP_MAX_CONCURRENT_SESSIONS", "7");
        }
        let cfg = ManagerConfig::default().apply_env_overrides();
        assert_eq!(cfg.backend.as_deref(), Some("override-backend"));
        assert_eq!(cfg.max_concurrent_sessions, 7);
        unsafe {
            std::env::remove_var("ACP_BACKEND");
            std::env::remove_var("ACP_MAX_CONCURRENT_SESSIONS");
        }
    }

    #[test]
    #[serial]
    fn empty_env_value_is_treated_as_unset() {
        unsafe {
            std::env::set_var("ACP_BACKEND", "");
        }
        let cfg = ManagerConfig::default().apply_env_overrides();
        assert_eq!(cfg.backend, None);
        unsafe {
            std::env::remove_var("ACP_BACKEND");
        }
    }
}
