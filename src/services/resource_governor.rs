//! Resource Governor
//!
//! Samples host-wide metrics on a fixed interval and keeps one alert flag per
//! metric. Alerts are edge-triggered: a warning fires on the false -> true
//! transition only, and an info-level recovery on true -> false.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::adapters::MetricsProvider;
use crate::config::GovernorConfig;
use crate::domain::{HostSnapshot, Metric, ResourceThresholds};
use crate::error::Result;
use crate::supervisor::{Alert, AlertLevel, AlertManager};

/// Result of evaluating one metric against its flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Raised,
    Cleared,
    Unchanged,
}

/// Edge-trigger rule. A value equal to the threshold is not a breach.
pub fn evaluate(value: f64, threshold: f64, flag: &mut bool) -> Transition {
    let breached = value > threshold;
    match (breached, *flag) {
        (true, false) => {
            *flag = true;
            Transition::Raised
        }
        (false, true) => {
            *flag = false;
            Transition::Cleared
        }
        _ => Transition::Unchanged,
    }
}

pub struct ResourceGovernor {
    metrics: Arc<dyn MetricsProvider>,
    alerts: AlertManager,
    thresholds: RwLock<ResourceThresholds>,
    flags: Mutex<HashMap<Metric, bool>>,
    summary_every_ticks: u64,
    ticks: AtomicU64,
    last_snapshot: RwLock<Option<HostSnapshot>>,
}

impl ResourceGovernor {
    pub fn new(
        config: &GovernorConfig,
        metrics: Arc<dyn MetricsProvider>,
        alerts: AlertManager,
    ) -> Self {
        Self {
            metrics,
            alerts,
            thresholds: RwLock::new(config.thresholds.clone()),
            flags: Mutex::new(HashMap::new()),
            summary_every_ticks: u64::from(config.summary_every_ticks.max(1)),
            ticks: AtomicU64::new(0),
            last_snapshot: RwLock::new(None),
        }
    }

    pub async fn thresholds(&self) -> ResourceThresholds {
        self.thresholds.read().await.clone()
    }

    /// Replace thresholds at runtime. Flags are kept; the next sample settles them.
    pub async fn set_thresholds(&self, thresholds: ResourceThresholds) {
        info!("Resource thresholds updated: {:?}", thresholds);
        *self.thresholds.write().await = thresholds;
    }

    /// Metrics currently in the alerting state
    pub async fn active_alerts(&self) -> Vec<Metric> {
        let flags = self.flags.lock().await;
        Metric::ALL
            .iter()
            .copied()
            .filter(|m| flags.get(m).copied().unwrap_or(false))
            .collect()
    }

    pub async fn last_snapshot(&self) -> Option<HostSnapshot> {
        self.last_snapshot.read().await.clone()
    }

    /// One governor tick: sample, evaluate, and periodically summarise
    pub async fn sample_once(&self) -> Result<Vec<(Metric, Transition)>> {
        let snapshot = self.metrics.host_snapshot().await?;
        let transitions = self.evaluate_snapshot(&snapshot).await;

        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        if tick % self.summary_every_ticks == 0 {
            self.alerts
                .info("resources", "Resource Status", &snapshot.summary())
                .await;
        } else {
            debug!("Resources: {}", snapshot.summary());
        }

        *self.last_snapshot.write().await = Some(snapshot);
        Ok(transitions)
    }

    /// Evaluate one snapshot against the thresholds, emitting alerts on edges
    pub async fn evaluate_snapshot(&self, snapshot: &HostSnapshot) -> Vec<(Metric, Transition)> {
        let thresholds = self.thresholds.read().await.clone();

        // Flags only change inside this section; alerts go out after it
        let transitions: Vec<(Metric, Transition, f64, f64)> = {
            let mut flags = self.flags.lock().await;
            Metric::ALL
                .iter()
                .filter_map(|metric| {
                    let threshold = thresholds.threshold(*metric)?;
                    let value = snapshot.value(*metric)?;
                    let flag = flags.entry(*metric).or_insert(false);
                    let transition = evaluate(value, threshold, flag);
                    Some((*metric, transition, value, threshold))
                })
                .collect()
        };

        for (metric, transition, value, threshold) in &transitions {
            match transition {
                Transition::Raised => {
                    let alert = Alert::new(
                        AlertLevel::Warning,
                        "resources",
                        &format!("{} Threshold Exceeded", capitalize(metric.as_str())),
                        &format!(
                            "{} at {:.1}{} (threshold {:.1}{})",
                            metric,
                            value,
                            metric.unit(),
                            threshold,
                            metric.unit()
                        ),
                    )
                    .with_metadata(serde_json::json!({
                        "metric": metric.as_str(),
                        "value": value,
                        "threshold": threshold,
                    }))
                    // One per crossing; a throttled raise would never be repeated
                    .prioritized();
                    self.alerts.alert(alert).await;
                }
                Transition::Cleared => {
                    self.alerts
                        .info(
                            "resources",
                            &format!("{} Recovered", capitalize(metric.as_str())),
                            &format!(
                                "{} back to {:.1}{} (threshold {:.1}{})",
                                metric,
                                value,
                                metric.unit(),
                                threshold,
                                metric.unit()
                            ),
                        )
                        .await;
                }
                Transition::Unchanged => {}
            }
        }

        transitions
            .into_iter()
            .map(|(metric, transition, _, _)| (metric, transition))
            .collect()
    }

    /// Ticker entry point; a failed sample is transient
    pub async fn tick(&self) {
        if let Err(e) = self.sample_once().await {
            warn!("Resource sample failed: {}", e);
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::resources::sample_snapshot;
    use crate::domain::ProcessUsage;
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoMetrics;

    #[async_trait]
    impl MetricsProvider for NoMetrics {
        async fn host_snapshot(&self) -> Result<HostSnapshot> {
            Ok(sample_snapshot(10.0))
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

    fn governor(alerts: AlertManager) -> ResourceGovernor {
        ResourceGovernor::new(&GovernorConfig::default(), Arc::new(NoMetrics), alerts)
    }

    #[test]
    fn test_evaluate_edges() {
        let mut flag = false;
        assert_eq!(evaluate(80.0, 85.0, &mut flag), Transition::Unchanged);
        assert_eq!(evaluate(86.0, 85.0, &mut flag), Transition::Raised);
        assert_eq!(evaluate(90.0, 85.0, &mut flag), Transition::Unchanged);
        assert_eq!(evaluate(85.0, 85.0, &mut flag), Transition::Cleared);
        assert!(!flag);
    }

    #[tokio::test]
    async fn test_memory_sequence_fires_twice_clears_once() {
        let alerts = AlertManager::with_defaults();
        let mut rx = alerts.subscribe();
        let governor = governor(alerts);

        let mut memory = Vec::new();
        for percent in [80.0, 86.0, 90.0, 83.0, 88.0] {
            let transitions = governor.evaluate_snapshot(&sample_snapshot(percent)).await;
            let (_, transition) = transitions
                .into_iter()
                .find(|(m, _)| *m == Metric::Memory)
                .unwrap();
            memory.push(transition);
        }

        assert_eq!(
            memory,
            vec![
                Transition::Unchanged,
                Transition::Raised,
                Transition::Unchanged,
                Transition::Cleared,
                Transition::Raised,
            ]
        );

        let mut warnings = 0;
        let mut recoveries = 0;
        while let Ok(alert) = rx.try_recv() {
            match alert.level {
                AlertLevel::Warning => warnings += 1,
                AlertLevel::Info => recoveries += 1,
                _ => {}
            }
        }
        assert_eq!(warnings, 2);
        assert_eq!(recoveries, 1);
        assert_eq!(governor.active_alerts().await, vec![Metric::Memory]);
    }

    #[tokio::test]
    async fn test_set_thresholds_takes_effect() {
        let governor = governor(AlertManager::with_defaults());
        let snapshot = sample_snapshot(50.0);
        assert!(governor
            .evaluate_snapshot(&snapshot)
            .await
            .iter()
            .all(|(_, t)| *t == Transition::Unchanged));

        let mut thresholds = governor.thresholds().await;
        thresholds.memory_percent = 40.0;
        thresholds.load_per_core = Some(0.1);
        governor.set_thresholds(thresholds).await;

        let transitions = governor.evaluate_snapshot(&snapshot).await;
        assert!(transitions.contains(&(Metric::Memory, Transition::Raised)));
        assert!(transitions.contains(&(Metric::Load, Transition::Raised)));
    }

    #[tokio::test]
    async fn test_summary_every_n_ticks() {
        let alerts = AlertManager::with_defaults();
        let mut rx = alerts.subscribe();
        let config = GovernorConfig {
            summary_every_ticks: 2,
            ..Default::default()
        };
        let governor = ResourceGovernor::new(&config, Arc::new(NoMetrics), alerts);

        for _ in 0..4 {
            governor.sample_once().await.unwrap();
        }

        let mut summaries = 0;
        while let Ok(alert) = rx.try_recv() {
            if alert.title == "Resource Status" {
                summaries += 1;
            }
        }
        assert_eq!(summaries, 2);
        assert!(governor.last_snapshot().await.is_some());
    }

    /// Records delivered alert titles
    #[derive(Default)]
    struct RecordingSink {
        titles: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl crate::supervisor::AlertSink for RecordingSink {
        async fn notify(&self, alert: &Alert) -> Result<()> {
            self.titles.lock().unwrap().push(alert.title.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_raise_reaches_sink_after_minute_budget_is_spent() {
        let sink = Arc::new(RecordingSink::default());
        let alerts = AlertManager::new(
            crate::supervisor::AlertManagerConfig::default(),
            sink.clone(),
        );
        for _ in 0..20 {
            alerts
                .warning("supervisor", "Memory Limit Exceeded", "restarting")
                .await;
        }

        let governor = governor(alerts);
        governor.evaluate_snapshot(&sample_snapshot(90.0)).await;
        governor.evaluate_snapshot(&sample_snapshot(91.0)).await;

        let mut delivered = Vec::new();
        for _ in 0..100 {
            delivered = sink.titles.lock().unwrap().clone();
            if delivered.len() >= 21 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let raises = delivered
            .iter()
            .filter(|t| *t == "Memory Threshold Exceeded")
            .count();
        assert_eq!(raises, 1);
        assert_eq!(governor.active_alerts().await, vec![Metric::Memory]);
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("memory"), "Memory");
        assert_eq!(capitalize(""), "");
    }
}
