//! Spawns the agent executable and exposes its stdio pipes.

use std::process::ExitStatus;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::config::AgentSpawnConfig;

/// Raw I/O handles for a spawned agent process. `stdin` is shared behind a
/// mutex because both the request/response path and a cancel-on-timeout
/// path may write to it.
pub struct ChildIo {
    pub stdin: Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub exit_status: Arc<Mutex<Option<ExitStatus>>>,
    pub process: Arc<Mutex<Option<Child>>>,
}

/// Spawn `config.executable` with piped stdin/stdout and a null stderr.
/// Closes already-created pipes on partial failure (spec.md §4.6: "close
/// already-created pipes on partial failure").
pub async fn spawn(config: &AgentSpawnConfig, cwd: &str) -> anyhow::Result<ChildIo> {
    let mut cmd = Command::new(&config.executable);
    cmd.args(&config.args);
    for (k, v) in &config.env {
        cmd.env(k, v);
    }
    if !cwd.is_empty() {
        cmd.current_dir(cwd);
    }
    cmd.stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null());

    let mut child = cmd
        .spawn()
        .map_err(|e| anyhow::anyhow!("failed to spawn agent '{}': {e}", config.executable))?;

    let stdin = match child.stdin.take() {
        Some(s) => s,
        None => {
            let _ = child.kill().await;
            anyhow::bail!("spawned child for '{}' has no stdin pipe", config.executable);
        }
    };
    let stdout = match child.stdout.take() {
        Some(s) => s,
        None => {
            drop(stdin);
            let _ = child.kill().await;
            anyhow::bail!("spawned child for '{}' has no stdout pipe", config.executable);
        }
    };

    Ok(ChildIo {
        stdin: Arc::new(Mutex::new(Box::new(stdin) as Box<dyn AsyncWrite + Send + Unpin>)),
        stdout: Box::new(stdout) as Box<dyn AsyncRead + Send + Unpin>,
        exit_status: Arc::new(Mutex::new(None)),
        process: Arc::new(Mutex::new(Some(child))),
    })
}

/// `Ok(())` when the executable exists and is executable; mirrors the
/// `doctor` semantics in spec.md §4.6 (`BACKEND_MISSING` vs
/// `BACKEND_UNAVAILABLE`).
pub fn doctor(config: &AgentSpawnConfig) -> DoctorOutcome {
    let path = std::path::Path::new(&config.executable);
    if path.is_absolute() || config.executable.contains('/') {
        if !path.exists() {
            return DoctorOutcome::Missing;
        }
        return if is_executable(path) {
            DoctorOutcome::Ok
        } else {
            DoctorOutcome::Unavailable
        };
    }

    match which(&config.executable) {
        Some(found) if is_executable(&found) => DoctorOutcome::Ok,
        Some(_) => DoctorOutcome::Unavailable,
        None => DoctorOutcome::Missing,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoctorOutcome {
    Ok,
    Missing,
    Unavailable,
}

fn which(executable: &str) -> Option<std::path::PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(executable))
        .find(|candidate| candidate.exists())
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doctor_reports_missing_for_nonexistent_absolute_path() {
        let cfg = AgentSpawnConfig::new("/definitely/not/a/real/binary-xyz");
        assert_eq!(doctor(&cfg), DoctorOutcome::Missing);
    }

    #[test]
    fn doctor_reports_ok_for_a_real_executable_on_path() {
        let cfg = AgentSpawnConfig::new("true");
        assert_eq!(doctor(&cfg), DoctorOutcome::Ok);
    }

    #[tokio::test]
    async fn spawn_fails_cleanly_for_nonexistent_executable() {
        let cfg = AgentSpawnConfig::new("/definitely/not/a/real/binary-xyz");
        let result = spawn(&cfg, "").await;
        assert!(result.is_err());
    }
}
