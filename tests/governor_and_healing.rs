//! Governor alerting and self-heal cycles against scripted host metrics

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warden::adapters::{MetricsProvider, Remediator, ServiceManager};
use warden::config::{GovernorConfig, HealthConfig, SupervisorConfig};
use warden::coordination::TargetLocks;
use warden::domain::{
    ActionKind, HostSnapshot, LoadAverage, Metric, ProcessSpec, ProcessUsage, ResourceThresholds,
};
use warden::persistence::StateStore;
use warden::services::{HealCollaborators, HealEngine, ResourceGovernor, Transition};
use warden::supervisor::{Alert, AlertLevel, AlertManager, AlertManagerConfig, AlertSink};
use warden::{ProcessSupervisor, Result, WardenError};

fn snapshot(memory_percent: f64, disk_percent: f64) -> HostSnapshot {
    HostSnapshot {
        timestamp: Utc::now(),
        memory_used_bytes: (memory_percent * 1024.0) as u64,
        memory_total_bytes: 100 * 1024,
        memory_percent,
        cpu_percent: 12.0,
        cpu_count: 4,
        disk_mount: "/".to_string(),
        disk_percent,
        load_average: LoadAverage {
            one: 0.4,
            five: 0.3,
            fifteen: 0.2,
        },
        temperature_celsius: None,
        established_connections: 8,
    }
}

/// Replays host samples in order, repeating the last one
struct ScriptedHost {
    samples: Mutex<VecDeque<HostSnapshot>>,
}

impl ScriptedHost {
    fn new(samples: impl IntoIterator<Item = HostSnapshot>) -> Self {
        Self {
            samples: Mutex::new(samples.into_iter().collect()),
        }
    }
}

#[async_trait]
impl MetricsProvider for ScriptedHost {
    async fn host_snapshot(&self) -> Result<HostSnapshot> {
        let mut samples = self.samples.lock().unwrap();
        match samples.len() {
            0 => Err(WardenError::Internal("script exhausted".to_string())),
            1 => Ok(samples[0].clone()),
            _ => Ok(samples.pop_front().unwrap()),
        }
    }

    async fn process_usage(&self, _pid: u32) -> Option<ProcessUsage> {
        None
    }

    async fn pids_named(&self, _name: &str) -> Vec<u32> {
        Vec::new()
    }

    async fn busy_processes(&self, _min: f32, _window: Duration) -> Vec<ProcessUsage> {
        Vec::new()
    }
}

#[derive(Default)]
struct RecordingSink {
    delivered: Mutex<Vec<Alert>>,
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        self.delivered.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

async fn delivered(sink: &RecordingSink, count: usize) -> Vec<Alert> {
    for _ in 0..200 {
        let alerts = sink.delivered.lock().unwrap().clone();
        if alerts.len() >= count {
            return alerts;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} deliveries", count);
}

/// Services whose liveness is scripted; restarts bring them back
struct FakeServices {
    down: Mutex<Vec<String>>,
    restarts: Mutex<Vec<String>>,
}

#[async_trait]
impl ServiceManager for FakeServices {
    async fn is_active(&self, service: &str) -> bool {
        !self.down.lock().unwrap().iter().any(|s| s == service)
    }

    async fn restart(&self, service: &str) -> Result<()> {
        self.down.lock().unwrap().retain(|s| s != service);
        self.restarts.lock().unwrap().push(service.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct NoopRemediator {
    cache_clears: Mutex<u32>,
}

#[async_trait]
impl Remediator for NoopRemediator {
    async fn clear_caches(&self) -> Result<String> {
        *self.cache_clears.lock().unwrap() += 1;
        Ok("dropped page cache".to_string())
    }

    async fn clean_logs(&self) -> Result<String> {
        Ok("nothing to clean".to_string())
    }

    async fn kill_process(&self, _pid: u32) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn governor_alerts_on_edges_only() {
    let sink = Arc::new(RecordingSink::default());
    let alerts = AlertManager::new(
        AlertManagerConfig {
            notify_info: true,
            ..AlertManagerConfig::default()
        },
        sink.clone(),
    );
    let config = GovernorConfig {
        summary_every_ticks: 1000,
        thresholds: ResourceThresholds {
            memory_percent: 85.0,
            ..ResourceThresholds::default()
        },
        ..GovernorConfig::default()
    };
    let host = ScriptedHost::new([80.0, 86.0, 90.0, 83.0, 88.0].map(|m| snapshot(m, 40.0)));
    let governor = ResourceGovernor::new(&config, Arc::new(host), alerts);

    let mut memory_transitions = Vec::new();
    for _ in 0..5 {
        let transitions = governor.sample_once().await.unwrap();
        let (_, memory) = transitions
            .into_iter()
            .find(|(metric, _)| *metric == Metric::Memory)
            .unwrap();
        memory_transitions.push(memory);
    }

    assert_eq!(
        memory_transitions,
        vec![
            Transition::Unchanged,
            Transition::Raised,
            Transition::Unchanged,
            Transition::Cleared,
            Transition::Raised,
        ]
    );
    assert_eq!(governor.active_alerts().await, vec![Metric::Memory]);

    let alerts = delivered(&sink, 3).await;
    let shape: Vec<(AlertLevel, String)> = alerts
        .iter()
        .map(|a| (a.level, a.title.clone()))
        .collect();
    assert_eq!(
        shape,
        vec![
            (AlertLevel::Warning, "Memory Threshold Exceeded".to_string()),
            (AlertLevel::Info, "Memory Recovered".to_string()),
            (AlertLevel::Warning, "Memory Threshold Exceeded".to_string()),
        ]
    );
}

#[tokio::test]
async fn heal_cycle_restarts_service_clears_caches_and_records_history() {
    let state_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(StateStore::new(state_dir.path(), 100));
    let sink = Arc::new(RecordingSink::default());
    let alerts = AlertManager::new(AlertManagerConfig::default(), sink.clone());
    let locks = TargetLocks::new();

    let services = Arc::new(FakeServices {
        down: Mutex::new(vec!["nginx".to_string()]),
        restarts: Mutex::new(Vec::new()),
    });
    let remediator = Arc::new(NoopRemediator::default());
    let host: Arc<dyn MetricsProvider> = Arc::new(ScriptedHost::new([snapshot(97.0, 50.0)]));

    // A critical spec the supervisor never started is reported, not restarted
    let supervisor = ProcessSupervisor::new(
        &SupervisorConfig {
            processes: vec![ProcessSpec::new("core", "/opt/core/bin/core")],
            ..SupervisorConfig::default()
        },
        locks.clone(),
        alerts.clone(),
        host.clone(),
        None,
    );

    let engine = HealEngine::new(
        HealthConfig {
            services: vec!["nginx".to_string(), "sshd".to_string()],
            firewall_service: None,
            intrusion_prevention_service: None,
            probe_timeout_secs: 2,
            ..HealthConfig::default()
        },
        HealCollaborators {
            services: services.clone(),
            metrics: host,
            remediator: remediator.clone(),
        },
        supervisor,
        locks,
        alerts,
        store.clone(),
    );

    let cycle = engine.run_cycle().await;
    assert!(!cycle.report.is_healthy());
    let kinds: Vec<ActionKind> = cycle.actions.iter().map(|a| a.kind).collect();
    let expected = vec![ActionKind::RestartService, ActionKind::ClearCaches];
    assert_eq!(kinds, expected);
    assert!(cycle.actions.iter().all(|a| a.success));
    let restarts = services.restarts.lock().unwrap().clone();
    assert_eq!(restarts, vec!["nginx".to_string()]);
    assert_eq!(*remediator.cache_clears.lock().unwrap(), 1);

    // One aggregated notification for the whole cycle
    let alerts = delivered(&sink, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    assert_eq!(alerts[0].title, "Self-Heal Actions");
    assert_eq!(alerts[0].level, AlertLevel::Warning);

    let history = store.read_healing_actions(10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].target, "nginx");

    let persisted = store.read_health_report().await.unwrap().unwrap();
    assert_eq!(persisted.generated_at, cycle.report.generated_at);
    assert_eq!(persisted.critical_processes.len(), 1);
    assert!(!persisted.critical_processes[0].running);

    // nginx is back; memory is still high so only the cache clear repeats
    let second = engine.run_cycle().await;
    let kinds: Vec<ActionKind> = second.actions.iter().map(|a| a.kind).collect();
    assert_eq!(kinds, vec![ActionKind::ClearCaches]);
    assert_eq!(store.read_healing_actions(10).await.unwrap().len(), 3);
}
