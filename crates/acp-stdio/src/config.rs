//! Spawn configuration for an ACP agent subprocess.

use std::time::Duration;

/// Everything needed to spawn and address one configured agent executable.
/// One `AgentSpawnConfig` typically corresponds to one `acp.backend` entry
/// in `acp_manager::config::ManagerConfig`.
#[derive(Debug, Clone)]
pub struct AgentSpawnConfig {
    pub executable: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub request_timeout: Duration,
}

impl AgentSpawnConfig {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            env: Vec::new(),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
