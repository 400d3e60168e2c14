//! Boundaries to the host and the outside world
//!
//! - Metrics provider: the single seam that reads OS metrics
//! - Service manager: systemd liveness and restarts
//! - Remediator: cache drops, log cleanup, forced kills
//! - Webhook: alert transport

pub mod metrics;
pub mod remediation;
pub mod service_manager;
pub mod signals;
pub mod webhook;

pub use metrics::{MetricsProvider, SysinfoProvider};
pub use remediation::{CleanupStats, Remediator, SystemRemediator};
pub use service_manager::{ServiceManager, SystemdServiceManager};
pub use webhook::WebhookSink;
