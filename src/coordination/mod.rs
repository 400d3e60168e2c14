//! Coordination Layer
//!
//! Infrastructure shared by the three monitoring loops:
//! - Per-target serialization tokens for restart/kill operations
//! - Fixed-interval tick runner with drop-and-log overrun handling
//! - Cooperative shutdown signalling

pub mod shutdown;
pub mod target_locks;
pub mod ticker;

pub use shutdown::{wait_for_os_signal, Shutdown, ShutdownListener};
pub use target_locks::{TargetGuard, TargetLocks};
pub use ticker::Ticker;
