//! Persistence Layer
//!
//! File-backed state for local diagnostics and the remediation audit trail.

pub mod state_store;

pub use state_store::{Heartbeat, StateStore, SupervisorRecord};
