use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{HostSnapshot, ProcessStatus};

/// Liveness of a service probed through the service manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub name: String,
    pub active: bool,
}

/// Liveness of a supervisor-critical process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalProcessHealth {
    pub name: String,
    pub running: bool,
    /// Matching entries in the host process table
    pub pid_count: usize,
    /// Status as reported by the supervisor
    pub supervisor_status: Option<ProcessStatus>,
}

/// Security-surface flags; `None` when the check is not configured
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySurface {
    pub firewall_active: Option<bool>,
    pub intrusion_prevention_active: Option<bool>,
}

impl SecuritySurface {
    pub fn is_exposed(&self) -> bool {
        self.firewall_active == Some(false) || self.intrusion_prevention_active == Some(false)
    }
}

/// Point-in-time deep health snapshot, superseded by the next one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub services: Vec<ServiceHealth>,
    pub critical_processes: Vec<CriticalProcessHealth>,
    /// `None` when the resource sample failed this cycle
    pub resources: Option<HostSnapshot>,
    pub security: SecuritySurface,
}

impl HealthReport {
    pub fn inactive_services(&self) -> impl Iterator<Item = &ServiceHealth> {
        self.services.iter().filter(|s| !s.active)
    }

    pub fn down_processes(&self) -> impl Iterator<Item = &CriticalProcessHealth> {
        self.critical_processes.iter().filter(|p| !p.running)
    }

    pub fn is_healthy(&self) -> bool {
        self.inactive_services().next().is_none()
            && self.down_processes().next().is_none()
            && self.resources.is_some()
            && !self.security.is_exposed()
    }
}

/// Kind of remediation attempted by the self-heal engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RestartService,
    ClearCaches,
    CleanLogs,
    KillStuckProcess,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::RestartService => "restart_service",
            ActionKind::ClearCaches => "clear_caches",
            ActionKind::CleanLogs => "clean_logs",
            ActionKind::KillStuckProcess => "kill_stuck_process",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audit record of one remediation attempt. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingAction {
    pub id: Uuid,
    pub kind: ActionKind,
    pub target: String,
    pub success: bool,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl HealingAction {
    pub fn new(kind: ActionKind, target: &str, success: bool, detail: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target: target.to_string(),
            success,
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }

    /// One line for aggregated notifications and the `history` command
    pub fn describe(&self) -> String {
        format!(
            "{} {} {} -> {} ({})",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.kind,
            self.target,
            if self.success { "ok" } else { "FAILED" },
            self.detail
        )
    }
}
