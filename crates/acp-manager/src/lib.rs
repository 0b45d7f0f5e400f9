//! Session manager core for the Agent Control Protocol.
//!
//! Composes a per-session actor queue, an idle-TTL runtime cache, active-turn
//! tracking with cancel/close semantics, and a pluggable backend registry
//! into the application-facing operations: `initialize`, `getStatus`,
//! `setMode`, `setConfigOption`, `runTurn`, `cancel`, `close`, and
//! `observability`. Runtime backends (e.g. the stdio JSON-RPC adapter in
//! `acp-stdio`) implement [`registry::RuntimeBackend`] and register
//! themselves with a [`registry::BackendRegistry`].

pub mod actor_queue;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod manager;
pub mod registry;
pub mod test_support;
pub mod turns;
pub mod types;

#[doc(inline)]
pub use error::{AcpError, AcpResult, ErrorCode};
#[doc(inline)]
pub use manager::SessionManager;
#[doc(inline)]
pub use registry::{BackendDescriptor, BackendRegistry, RuntimeBackend};
