//! Ambient stack shared by `acp-manager` and its runtime backends.
//!
//! This crate carries the two concerns every binary built on top of the
//! session manager needs and that the manager itself should not have to
//! re-derive: process-wide logging initialization and best-effort structured
//! event emission for lifecycle milestones (session init/close, turn
//! start/complete, backend health changes, idle eviction).

pub mod event_log;
pub mod home;
pub mod logging;
