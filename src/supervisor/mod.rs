//! Supervisor Layer
//!
//! - Process supervisor: spawns, restarts and resource-polices the roster
//! - Restart budget: rolling crash-restart accounting per process
//! - Alert manager: fire-and-forget notification routing

pub mod alert_manager;
pub mod process_supervisor;
pub mod restart_budget;

pub use alert_manager::{Alert, AlertLevel, AlertManager, AlertManagerConfig, AlertSink, LogSink};
pub use process_supervisor::{ProcessSupervisor, SupervisorEvent};
pub use restart_budget::{BudgetDecision, RestartBudget};
