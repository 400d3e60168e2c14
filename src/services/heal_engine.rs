//! Health / Self-Heal Engine
//!
//! Slow-cadence deep health check:
//! - Probes configured services, the supervisor's critical processes, host
//!   resources and the security surface, then persists the report
//! - Converts findings into remediation through `RemediationPolicy`
//! - Records every attempt in the healing log and sends one aggregated
//!   notification per cycle that acted
//!
//! Remediation of a target is skipped for the cycle when another actor holds
//! its serialization token. Critical processes are verified only; their
//! restarts belong to the supervisor.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::remediation_policy::{
    findings_from_report, Finding, RemediationAction, RemediationPolicy,
};
use crate::adapters::{MetricsProvider, Remediator, ServiceManager};
use crate::config::HealthConfig;
use crate::coordination::TargetLocks;
use crate::domain::{
    ActionKind, CriticalProcessHealth, HealingAction, HealthReport, ProcessStatus,
    SecuritySurface, ServiceHealth,
};
use crate::error::{Result, WardenError};
use crate::persistence::{Heartbeat, StateStore};
use crate::supervisor::{Alert, AlertLevel, AlertManager, ProcessSupervisor};

/// Token names for host-wide remediations
const CACHES_TARGET: &str = "host:caches";
const LOGS_TARGET: &str = "host:logs";

/// External capabilities the engine acts through
#[derive(Clone)]
pub struct HealCollaborators {
    pub services: Arc<dyn ServiceManager>,
    pub metrics: Arc<dyn MetricsProvider>,
    pub remediator: Arc<dyn Remediator>,
}

/// Outcome of one deep-health cycle
#[derive(Debug, Clone)]
pub struct HealCycle {
    pub report: HealthReport,
    pub findings: Vec<Finding>,
    pub actions: Vec<HealingAction>,
}

pub struct HealEngine {
    config: HealthConfig,
    collaborators: HealCollaborators,
    policy: RemediationPolicy,
    supervisor: ProcessSupervisor,
    locks: TargetLocks,
    alerts: AlertManager,
    store: Arc<StateStore>,
    started: Instant,
}

impl HealEngine {
    pub fn new(
        config: HealthConfig,
        collaborators: HealCollaborators,
        supervisor: ProcessSupervisor,
        locks: TargetLocks,
        alerts: AlertManager,
        store: Arc<StateStore>,
    ) -> Self {
        let policy = RemediationPolicy::from_config(&config);
        Self {
            config,
            collaborators,
            policy,
            supervisor,
            locks,
            alerts,
            store,
            started: Instant::now(),
        }
    }

    /// Time-bounded liveness probe; a timeout counts as inactive
    async fn probe_service(&self, service: &str) -> bool {
        let probe_timeout = self.config.probe_timeout();
        let check = self.collaborators.services.is_active(service);
        match timeout(probe_timeout, check).await {
            Ok(active) => active,
            Err(_) => {
                warn!("Probe of {} timed out after {:?}", service, probe_timeout);
                false
            }
        }
    }

    async fn probe_optional(&self, service: Option<&str>) -> Option<bool> {
        match service {
            Some(name) if !name.is_empty() => Some(self.probe_service(name).await),
            _ => None,
        }
    }

    /// Build a fresh health report
    pub async fn probe(&self) -> HealthReport {
        let service_probes = self.config.services.iter().map(|name| async move {
            ServiceHealth {
                name: name.clone(),
                active: self.probe_service(name).await,
            }
        });
        let services = futures::future::join_all(service_probes).await;

        let mut critical_processes = Vec::new();
        for view in self.supervisor.snapshot().await {
            if !view.critical {
                continue;
            }
            let executable = self
                .supervisor
                .spec_executable(&view.name)
                .await
                .unwrap_or_else(|| view.name.clone());
            let pid_count = self.collaborators.metrics.pids_named(&executable).await.len();
            critical_processes.push(CriticalProcessHealth {
                name: view.name.clone(),
                running: view.status == ProcessStatus::Running && view.pid.is_some(),
                pid_count,
                supervisor_status: Some(view.status),
            });
        }

        let resources = match timeout(
            self.config.probe_timeout(),
            self.collaborators.metrics.host_snapshot(),
        )
        .await
        {
            Ok(Ok(snapshot)) => Some(snapshot),
            Ok(Err(e)) => {
                warn!("Resource snapshot failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Resource snapshot timed out");
                None
            }
        };

        let (firewall_active, intrusion_prevention_active) = tokio::join!(
            self.probe_optional(self.config.firewall_service.as_deref()),
            self.probe_optional(self.config.intrusion_prevention_service.as_deref()),
        );

        HealthReport {
            generated_at: Utc::now(),
            services,
            critical_processes,
            resources,
            security: SecuritySurface {
                firewall_active,
                intrusion_prevention_active,
            },
        }
    }

    /// Runaway candidates: configured names only, never PID 1, this agent or a
    /// supervisor-managed child
    async fn detect_runaways(&self) -> Vec<Finding> {
        let runaway = &self.config.runaway;
        if runaway.targets.is_empty() {
            return Vec::new();
        }

        let mut protected: HashSet<u32> =
            self.supervisor.managed_pids().await.into_iter().collect();
        protected.insert(1);
        protected.insert(std::process::id());

        self.collaborators
            .metrics
            .busy_processes(
                runaway.cpu_percent,
                Duration::from_millis(runaway.sample_window_ms),
            )
            .await
            .into_iter()
            .filter(|usage| {
                let eligible =
                    !protected.contains(&usage.pid) && runaway.targets.contains(&usage.name);
                if !eligible {
                    debug!(
                        "Busy process {} (pid {}) is not a runaway target",
                        usage.name, usage.pid
                    );
                }
                eligible
            })
            .map(|usage| Finding::RunawayProcess {
                pid: usage.pid,
                name: usage.name,
                cpu_percent: usage.cpu_percent,
            })
            .collect()
    }

    /// One full cycle: probe, persist, remediate, notify
    pub async fn run_cycle(&self) -> HealCycle {
        let report = self.probe().await;
        if let Err(e) = self.store.write_health_report(&report).await {
            warn!("Failed to persist health report: {}", e);
        }

        let mut findings = findings_from_report(
            &report,
            self.config.critical_memory_percent,
            self.config.critical_disk_percent,
        );
        findings.extend(self.detect_runaways().await);

        if findings.is_empty() {
            info!("Health check passed");
        } else {
            info!("Health check found {} problem(s)", findings.len());
        }

        let mut actions = Vec::new();
        for action in self.policy.plan(&findings) {
            if let Some(record) = self.execute(action).await {
                if let Err(e) = self.store.append_healing_action(&record).await {
                    warn!("Failed to record healing action: {}", e);
                }
                actions.push(record);
            }
        }

        if !actions.is_empty() {
            self.notify(&actions).await;
        }

        HealCycle {
            report,
            findings,
            actions,
        }
    }

    /// Ticker entry point
    pub async fn tick(&self) {
        self.run_cycle().await;
    }

    async fn bounded<F>(&self, operation: &str, fut: F) -> Result<String>
    where
        F: std::future::Future<Output = Result<String>>,
    {
        let limit = self.config.probe_timeout();
        timeout(limit, fut)
            .await
            .map_err(|_| WardenError::timeout(operation, limit))?
    }

    async fn execute(&self, action: RemediationAction) -> Option<HealingAction> {
        let (kind, target, lock_key) = match &action {
            RemediationAction::RestartService { service } => {
                (ActionKind::RestartService, service.clone(), service.clone())
            }
            RemediationAction::ClearCaches => {
                (ActionKind::ClearCaches, "host".to_string(), CACHES_TARGET.to_string())
            }
            RemediationAction::CleanLogs => {
                (ActionKind::CleanLogs, "host".to_string(), LOGS_TARGET.to_string())
            }
            RemediationAction::KillProcess { pid, name } => (
                ActionKind::KillStuckProcess,
                format!("{} (pid {})", name, pid),
                name.clone(),
            ),
            RemediationAction::VerifyOnly { name } => {
                warn!(
                    "Critical process {} is down; restart left to the supervisor",
                    name
                );
                return None;
            }
            RemediationAction::ReportOnly { reason } => {
                warn!("Not remediated: {}", reason);
                return None;
            }
        };

        let Some(_guard) = self.locks.try_acquire(&lock_key) else {
            info!("{} held elsewhere, skipping {} this cycle", lock_key, kind);
            return None;
        };

        let services = &self.collaborators.services;
        let remediator = &self.collaborators.remediator;
        let result = match &action {
            RemediationAction::RestartService { service } => {
                self.bounded(&format!("restart {}", service), async {
                    services.restart(service).await?;
                    Ok::<String, WardenError>("restarted via service manager".to_string())
                })
                .await
            }
            RemediationAction::ClearCaches => {
                self.bounded("clear caches", remediator.clear_caches()).await
            }
            RemediationAction::CleanLogs => {
                self.bounded("clean logs", remediator.clean_logs()).await
            }
            RemediationAction::KillProcess { pid, .. } => {
                self.bounded("kill process", async {
                    remediator.kill_process(*pid).await?;
                    Ok::<String, WardenError>("sent SIGKILL".to_string())
                })
                .await
            }
            RemediationAction::VerifyOnly { .. } | RemediationAction::ReportOnly { .. } => {
                return None
            }
        };

        let record = match result {
            Ok(detail) => {
                info!("Action {} on {} succeeded: {}", kind, target, detail);
                HealingAction::new(kind, &target, true, detail)
            }
            Err(e) => {
                warn!("Healing action {} on {} failed: {}", kind, target, e);
                HealingAction::new(kind, &target, false, e.to_string())
            }
        };
        Some(record)
    }

    async fn notify(&self, actions: &[HealingAction]) {
        let failed = actions.iter().filter(|a| !a.success).count();
        let level = if failed > 0 {
            AlertLevel::Error
        } else {
            AlertLevel::Warning
        };
        let body = actions
            .iter()
            .map(HealingAction::describe)
            .collect::<Vec<_>>()
            .join("\n");

        let alert = Alert::new(
            level,
            "health",
            "Self-Heal Actions",
            &format!("{} action(s), {} failed\n{}", actions.len(), failed, body),
        )
        .with_metadata(serde_json::json!({
            "actions": actions.len(),
            "failed": failed,
        }))
        .prioritized();
        self.alerts.alert(alert).await;
    }

    /// Overwrite the liveness marker
    pub async fn write_heartbeat(&self) -> Result<()> {
        self.store
            .write_heartbeat(&Heartbeat {
                pid: std::process::id(),
                timestamp: Utc::now(),
                uptime_secs: self.started.elapsed().as_secs(),
            })
            .await
    }

    /// Heartbeat ticker entry point; failures are cosmetic
    pub async fn heartbeat_tick(&self) {
        if let Err(e) = self.write_heartbeat().await {
            debug!("Heartbeat write failed: {}", e);
        }
    }
}
