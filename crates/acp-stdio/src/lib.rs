//! Stdio JSON-RPC runtime backend for the ACP session manager.
//!
//! Spawns a configured agent executable, speaks newline-delimited JSON-RPC
//! over its stdin/stdout, and translates `session/update` notifications
//! into the typed [`acp_manager::events::AcpEvent`] stream consumed by
//! `acp_manager::manager::SessionManager::run_turn`.

pub mod adapter;
pub mod config;
pub mod event_parse;
pub mod framing;
pub mod process;
pub mod rpc;
pub mod tool_names;

#[doc(inline)]
pub use adapter::StdioBackend;
#[doc(inline)]
pub use config::AgentSpawnConfig;
