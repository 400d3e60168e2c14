//! Remediation Policy
//!
//! Maps health findings to remediation actions. The table is data-driven: the
//! only per-target knowledge is the set of services the agent was configured
//! to manage.

use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

use crate::config::HealthConfig;
use crate::domain::HealthReport;

/// Problem detected during a deep-health cycle
#[derive(Debug, Clone, PartialEq)]
pub enum Finding {
    ServiceInactive { service: String },
    CriticalProcessDown { name: String },
    MemoryCritical { percent: f64 },
    DiskCritical { mount: String, percent: f64 },
    RunawayProcess {
        pid: u32,
        name: String,
        cpu_percent: f32,
    },
    SecurityExposed { detail: String },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::ServiceInactive { service } => write!(f, "service {} inactive", service),
            Finding::CriticalProcessDown { name } => write!(f, "critical process {} down", name),
            Finding::MemoryCritical { percent } => write!(f, "memory at {:.1}%", percent),
            Finding::DiskCritical { mount, percent } => {
                write!(f, "disk {} at {:.1}%", mount, percent)
            }
            Finding::RunawayProcess {
                pid,
                name,
                cpu_percent,
            } => write!(f, "{} (pid {}) at {:.0}% CPU", name, pid, cpu_percent),
            Finding::SecurityExposed { detail } => write!(f, "security surface: {}", detail),
        }
    }
}

/// Remediation the engine may attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationAction {
    /// Single restart through the service manager
    RestartService { service: String },
    /// Supervisor owns the restart; verify and report only
    VerifyOnly { name: String },
    ClearCaches,
    CleanLogs,
    KillProcess { pid: u32, name: String },
    /// Logged, never acted upon
    ReportOnly { reason: String },
}

pub struct RemediationPolicy {
    managed_services: HashSet<String>,
}

impl RemediationPolicy {
    pub fn new<I, S>(managed_services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            managed_services: managed_services.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &HealthConfig) -> Self {
        Self::new(config.services.iter().cloned())
    }

    /// Determine the action for one finding
    pub fn action_for(&self, finding: &Finding) -> RemediationAction {
        match finding {
            Finding::ServiceInactive { service } => {
                if self.managed_services.contains(service) {
                    RemediationAction::RestartService {
                        service: service.clone(),
                    }
                } else {
                    warn!("Ignoring unmanaged service {}", service);
                    RemediationAction::ReportOnly {
                        reason: format!("{} is not a configured service", service),
                    }
                }
            }
            Finding::CriticalProcessDown { name } => {
                RemediationAction::VerifyOnly { name: name.clone() }
            }
            Finding::MemoryCritical { .. } => RemediationAction::ClearCaches,
            Finding::DiskCritical { .. } => RemediationAction::CleanLogs,
            Finding::RunawayProcess { pid, name, .. } => RemediationAction::KillProcess {
                pid: *pid,
                name: name.clone(),
            },
            Finding::SecurityExposed { .. } => RemediationAction::ReportOnly {
                reason: finding.to_string(),
            },
        }
    }

    /// Actions for a whole cycle, duplicates removed and order kept
    pub fn plan(&self, findings: &[Finding]) -> Vec<RemediationAction> {
        let mut plan: Vec<RemediationAction> = Vec::new();
        for finding in findings {
            let action = self.action_for(finding);
            if !plan.contains(&action) {
                debug!("{} -> {:?}", finding, action);
                plan.push(action);
            }
        }
        plan
    }
}

/// Findings derivable from a report alone. Runaway processes need a separate
/// sustained CPU sample and are detected by the engine.
pub fn findings_from_report(
    report: &HealthReport,
    critical_memory_percent: f64,
    critical_disk_percent: f64,
) -> Vec<Finding> {
    let mut findings: Vec<Finding> = report
        .inactive_services()
        .map(|s| Finding::ServiceInactive {
            service: s.name.clone(),
        })
        .collect();

    findings.extend(
        report
            .down_processes()
            .map(|p| Finding::CriticalProcessDown {
                name: p.name.clone(),
            }),
    );

    if let Some(resources) = &report.resources {
        if resources.memory_percent > critical_memory_percent {
            findings.push(Finding::MemoryCritical {
                percent: resources.memory_percent,
            });
        }
        if resources.disk_percent > critical_disk_percent {
            findings.push(Finding::DiskCritical {
                mount: resources.disk_mount.clone(),
                percent: resources.disk_percent,
            });
        }
    }

    let security = &report.security;
    if security.firewall_active == Some(false) {
        findings.push(Finding::SecurityExposed {
            detail: "firewall inactive".to_string(),
        });
    }
    if security.intrusion_prevention_active == Some(false) {
        findings.push(Finding::SecurityExposed {
            detail: "intrusion prevention inactive".to_string(),
        });
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CriticalProcessHealth, SecuritySurface, ServiceHealth};
    use chrono::Utc;

    #[test]
    fn test_unmanaged_service_is_report_only() {
        let policy = RemediationPolicy::new(["nginx"]);
        assert_eq!(
            policy.action_for(&Finding::ServiceInactive {
                service: "nginx".to_string()
            }),
            RemediationAction::RestartService {
                service: "nginx".to_string()
            }
        );
        assert!(matches!(
            policy.action_for(&Finding::ServiceInactive {
                service: "redis".to_string()
            }),
            RemediationAction::ReportOnly { .. }
        ));
    }

    #[test]
    fn test_critical_process_is_never_restarted_here() {
        let policy = RemediationPolicy::new(["core"]);
        assert_eq!(
            policy.action_for(&Finding::CriticalProcessDown {
                name: "core".to_string()
            }),
            RemediationAction::VerifyOnly {
                name: "core".to_string()
            }
        );
    }

    #[test]
    fn test_plan_deduplicates() {
        let policy = RemediationPolicy::new(Vec::<String>::new());
        let plan = policy.plan(&[
            Finding::MemoryCritical { percent: 97.0 },
            Finding::DiskCritical {
                mount: "/".to_string(),
                percent: 99.0,
            },
            Finding::MemoryCritical { percent: 98.0 },
        ]);
        assert_eq!(
            plan,
            vec![RemediationAction::ClearCaches, RemediationAction::CleanLogs]
        );
    }

    #[test]
    fn test_findings_from_report() {
        let mut resources = crate::domain::resources::sample_snapshot(96.0);
        resources.disk_percent = 50.0;
        let report = HealthReport {
            generated_at: Utc::now(),
            services: vec![ServiceHealth {
                name: "nginx".to_string(),
                active: false,
            }],
            critical_processes: vec![CriticalProcessHealth {
                name: "core".to_string(),
                running: false,
                pid_count: 0,
                supervisor_status: None,
            }],
            resources: Some(resources),
            security: SecuritySurface {
                firewall_active: Some(false),
                intrusion_prevention_active: None,
            },
        };

        let findings = findings_from_report(&report, 95.0, 95.0);
        assert_eq!(findings.len(), 4);
        let memory = Finding::MemoryCritical { percent: 96.0 };
        assert!(findings.contains(&memory));
        assert!(!findings
            .iter()
            .any(|f| matches!(f, Finding::DiskCritical { .. })));
    }
}
