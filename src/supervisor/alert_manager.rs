//! Alert Manager
//!
//! Routes alerts from the supervision loops to the configured sink. Delivery is
//! fire-and-forget: alerts are queued, delivered by a single worker with a
//! timeout, and a failing sink degrades the daemon to log-only operation
//! without ever blocking a monitoring loop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::AlertsConfig;
use crate::error::{Result, WardenError};

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertLevel {
    /// Informational - log only unless info forwarding is enabled
    Info,
    /// Warning - threshold breaches, transient remediation failures
    Warning,
    /// Error - remediation performed or failed
    Error,
    /// Critical - terminal conditions, bypasses throttling
    Critical,
}

impl AlertLevel {
    /// Get emoji prefix for alert level
    pub fn emoji(&self) -> &'static str {
        match self {
            AlertLevel::Info => "\u{2139}\u{fe0f}",    // info icon
            AlertLevel::Warning => "\u{26a0}\u{fe0f}", // warning icon
            AlertLevel::Error => "\u{274c}",           // red X
            AlertLevel::Critical => "\u{1f6a8}",       // police light
        }
    }

    /// Get severity string
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alert payload
#[derive(Debug, Clone)]
pub struct Alert {
    pub level: AlertLevel,
    /// Originating concern: `supervisor`, `resources`, `health`, ...
    pub category: String,
    pub title: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    /// Bypasses the per-minute throttle and the bounded queue. Set on
    /// edge-triggered and once-per-cycle alerts, whose volume is bounded by
    /// their producer.
    pub priority: bool,
}

impl Alert {
    /// Create a new alert
    pub fn new(level: AlertLevel, category: &str, title: &str, message: &str) -> Self {
        Self {
            level,
            category: category.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            metadata: None,
            timestamp: Utc::now(),
            priority: false,
        }
    }

    /// Never throttle or drop this alert
    pub fn prioritized(mut self) -> Self {
        self.priority = true;
        self
    }

    fn is_priority(&self) -> bool {
        self.priority || self.level == AlertLevel::Critical
    }

    /// Add metadata to the alert
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Format as a plain-text notification body
    pub fn format_text(&self) -> String {
        format!(
            "{} **{}**\n\n**Category:** {}\n**Time:** {}\n\n{}",
            self.level.emoji(),
            self.title,
            self.category,
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.message
        )
    }
}

/// Delivery capability consumed by the alert manager
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Sink used when no transport is configured
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        debug!("No alert transport, '{}' kept local", alert.title);
        Ok(())
    }
}

/// Configuration for alert manager
#[derive(Debug, Clone)]
pub struct AlertManagerConfig {
    /// Whether to send alerts for info level (default: false)
    pub notify_info: bool,
    /// Maximum alerts per minute before throttling (default: 20)
    pub max_alerts_per_minute: u32,
    /// Upper bound on one delivery call (default: 10s)
    pub delivery_timeout: Duration,
    /// Pending deliveries before new alerts are dropped (default: 64)
    pub queue_capacity: usize,
    /// Consecutive failures before degrading to log-only (default: 5)
    pub failure_threshold: u32,
}

impl Default for AlertManagerConfig {
    fn default() -> Self {
        Self {
            notify_info: false,
            max_alerts_per_minute: 20,
            delivery_timeout: Duration::from_secs(10),
            queue_capacity: 64,
            failure_threshold: 5,
        }
    }
}

impl From<&AlertsConfig> for AlertManagerConfig {
    fn from(config: &AlertsConfig) -> Self {
        Self {
            notify_info: config.notify_info,
            max_alerts_per_minute: config.max_alerts_per_minute,
            delivery_timeout: Duration::from_secs(config.delivery_timeout_secs),
            queue_capacity: config.queue_capacity.max(1),
            failure_threshold: config.failure_threshold.max(1),
        }
    }
}

/// Alert Manager for coordinating notifications
#[derive(Clone)]
pub struct AlertManager {
    config: AlertManagerConfig,
    queue: mpsc::Sender<Alert>,
    /// Unbounded lane for priority alerts, drained first
    priority_queue: mpsc::UnboundedSender<Alert>,
    alerts_this_minute: Arc<RwLock<Vec<DateTime<Utc>>>>,
    degraded: Arc<AtomicBool>,
    event_tx: broadcast::Sender<Alert>,
}

impl AlertManager {
    /// Create a new alert manager and start its delivery worker
    pub fn new(config: AlertManagerConfig, sink: Arc<dyn AlertSink>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let (queue, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (priority_queue, priority_rx) = mpsc::unbounded_channel();
        let degraded = Arc::new(AtomicBool::new(false));

        tokio::spawn(delivery_worker(
            sink,
            priority_rx,
            rx,
            config.delivery_timeout,
            config.failure_threshold,
            degraded.clone(),
        ));

        Self {
            config,
            queue,
            priority_queue,
            alerts_this_minute: Arc::new(RwLock::new(Vec::new())),
            degraded,
            event_tx,
        }
    }

    /// Create a log-only manager with default configuration
    pub fn with_defaults() -> Self {
        Self::new(AlertManagerConfig::default(), Arc::new(LogSink))
    }

    /// Subscribe to alerts
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.event_tx.subscribe()
    }

    /// Whether delivery has degraded to log-only after repeated failures
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Check global rate limit (alerts per minute)
    async fn is_throttled(&self) -> bool {
        let now = Utc::now();
        let minute_ago = now - chrono::Duration::minutes(1);

        let mut alerts = self.alerts_this_minute.write().await;

        // Clean old entries
        alerts.retain(|t| *t > minute_ago);

        if alerts.len() >= self.config.max_alerts_per_minute as usize {
            warn!(
                "Alert throttling: {} alerts in last minute (max: {})",
                alerts.len(),
                self.config.max_alerts_per_minute
            );
            return true;
        }

        alerts.push(now);
        false
    }

    /// Send an alert. Never blocks on delivery.
    pub async fn alert(&self, alert: Alert) {
        // Always broadcast locally
        let _ = self.event_tx.send(alert.clone());

        // Log based on level
        match alert.level {
            AlertLevel::Info => info!("[{}] {}: {}", alert.category, alert.title, alert.message),
            AlertLevel::Warning => {
                warn!("[{}] {}: {}", alert.category, alert.title, alert.message)
            }
            AlertLevel::Error => {
                error!("[{}] {}: {}", alert.category, alert.title, alert.message)
            }
            AlertLevel::Critical => {
                error!(
                    "CRITICAL [{}] {}: {}",
                    alert.category, alert.title, alert.message
                )
            }
        }

        let should_notify = match alert.level {
            AlertLevel::Info => self.config.notify_info,
            AlertLevel::Warning | AlertLevel::Error | AlertLevel::Critical => true,
        };

        if !should_notify {
            return;
        }

        if alert.is_priority() {
            if self.priority_queue.send(alert).is_err() {
                warn!("Alert delivery worker gone, priority alert kept local");
            }
            return;
        }

        if self.is_throttled().await {
            return;
        }

        if let Err(e) = self.queue.try_send(alert) {
            warn!("Alert queue unavailable, dropping delivery: {}", e);
        }
    }

    /// Send an info alert
    pub async fn info(&self, category: &str, title: &str, message: &str) {
        self.alert(Alert::new(AlertLevel::Info, category, title, message))
            .await;
    }

    /// Send a warning alert
    pub async fn warning(&self, category: &str, title: &str, message: &str) {
        self.alert(Alert::new(AlertLevel::Warning, category, title, message))
            .await;
    }

    /// Send alert about a process whose restart budget is exhausted
    pub async fn restart_exhausted(&self, process: &str, attempts: u32) {
        self.alert(
            Alert::new(
                AlertLevel::Critical,
                "supervisor",
                "Restart Budget Exhausted",
                &format!(
                    "Process {} crashed {} times within its restart window and is marked failed",
                    process, attempts
                ),
            )
            .with_metadata(serde_json::json!({
                "action": "manual_intervention_required",
                "process": process,
                "attempts": attempts
            })),
        )
        .await;
    }
}

async fn delivery_worker(
    sink: Arc<dyn AlertSink>,
    mut priority_rx: mpsc::UnboundedReceiver<Alert>,
    mut rx: mpsc::Receiver<Alert>,
    delivery_timeout: Duration,
    failure_threshold: u32,
    degraded: Arc<AtomicBool>,
) {
    let mut consecutive_failures = 0u32;

    loop {
        let alert = tokio::select! {
            biased;
            Some(alert) = priority_rx.recv() => alert,
            Some(alert) = rx.recv() => alert,
            else => break,
        };

        let result = match tokio::time::timeout(delivery_timeout, sink.notify(&alert)).await {
            Ok(result) => result,
            Err(_) => Err(WardenError::timeout("alert delivery", delivery_timeout)),
        };

        match result {
            Ok(()) => {
                if degraded.swap(false, Ordering::SeqCst) {
                    info!(
                        "Alert delivery recovered after {} failed attempt(s)",
                        consecutive_failures
                    );
                }
                consecutive_failures = 0;
                debug!("Delivered alert '{}'", alert.title);
            }
            Err(e) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                if degraded.load(Ordering::SeqCst) {
                    debug!("Alert delivery still failing: {}", e);
                } else if consecutive_failures >= failure_threshold {
                    degraded.store(true, Ordering::SeqCst);
                    error!(
                        "Alert sink unreachable after {} consecutive failures, degrading to log-only: {}",
                        consecutive_failures, e
                    );
                } else {
                    warn!("Failed to deliver alert '{}': {}", alert.title, e);
                }
            }
        }
    }

    debug!("Alert delivery worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingSink {
        delivered: AtomicU32,
        fail: bool,
        hang: bool,
    }

    #[async_trait]
    impl AlertSink for CountingSink {
        async fn notify(&self, _alert: &Alert) -> Result<()> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail {
                return Err(WardenError::AlertDelivery("unreachable".to_string()));
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Blocks every delivery until permits are released
    struct GatedSink {
        gate: tokio::sync::Semaphore,
        titles: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AlertSink for GatedSink {
        async fn notify(&self, alert: &Alert) -> Result<()> {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            self.titles.lock().unwrap().push(alert.title.clone());
            Ok(())
        }
    }

    fn sink(fail: bool, hang: bool) -> Arc<CountingSink> {
        Arc::new(CountingSink {
            delivered: AtomicU32::new(0),
            fail,
            hang,
        })
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[test]
    fn test_alert_level_ordering() {
        assert!(AlertLevel::Info < AlertLevel::Warning);
        assert!(AlertLevel::Warning < AlertLevel::Error);
        assert!(AlertLevel::Error < AlertLevel::Critical);
    }

    #[test]
    fn test_alert_format_text() {
        let alert = Alert::new(
            AlertLevel::Warning,
            "resources",
            "Memory Threshold Exceeded",
            "memory at 91.0%",
        );

        let formatted = alert.format_text();
        assert!(formatted.contains("Memory Threshold Exceeded"));
        assert!(formatted.contains("resources"));
        assert!(formatted.contains("memory at 91.0%"));
    }

    #[tokio::test]
    async fn test_info_is_local_only_by_default() {
        let sink = sink(false, false);
        let manager = AlertManager::new(AlertManagerConfig::default(), sink.clone());
        let mut rx = manager.subscribe();

        manager.info("resources", "Status", "all good").await;
        manager.warning("resources", "Memory", "high").await;
        settle().await;

        // Both are broadcast locally, only the warning reaches the sink
        assert_eq!(rx.try_recv().unwrap().level, AlertLevel::Info);
        assert_eq!(rx.try_recv().unwrap().level, AlertLevel::Warning);
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_throttle_spares_critical() {
        let sink = sink(false, false);
        let config = AlertManagerConfig {
            max_alerts_per_minute: 2,
            ..Default::default()
        };
        let manager = AlertManager::new(config, sink.clone());

        for _ in 0..5 {
            manager.warning("health", "Noise", "repeated").await;
        }
        manager.restart_exhausted("core", 3).await;
        settle().await;

        assert_eq!(sink.delivered.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failing_sink_degrades_to_log_only() {
        let sink = sink(true, false);
        let config = AlertManagerConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let manager = AlertManager::new(config, sink);

        manager.warning("health", "First", "x").await;
        settle().await;
        assert!(!manager.is_degraded());

        manager.warning("health", "Second", "x").await;
        settle().await;
        assert!(manager.is_degraded());
    }

    #[tokio::test]
    async fn test_hanging_sink_never_blocks_caller() {
        let sink = sink(false, true);
        let config = AlertManagerConfig {
            delivery_timeout: Duration::from_millis(10),
            queue_capacity: 1,
            ..Default::default()
        };
        let manager = AlertManager::new(config, sink);

        let started = std::time::Instant::now();
        for i in 0..10 {
            manager.warning("supervisor", &format!("Alert {}", i), "x").await;
            manager.restart_exhausted(&format!("svc{}", i), 4).await;
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_prioritized_alert_survives_spent_minute_budget() {
        let sink = sink(false, false);
        let config = AlertManagerConfig {
            max_alerts_per_minute: 3,
            ..Default::default()
        };
        let manager = AlertManager::new(config, sink.clone());

        for _ in 0..3 {
            manager.warning("supervisor", "Memory Limit Exceeded", "x").await;
        }
        manager.warning("supervisor", "Throttled", "x").await;
        let raise = Alert::new(AlertLevel::Warning, "resources", "Memory Raised", "x");
        manager.alert(raise.prioritized()).await;
        settle().await;

        assert_eq!(sink.delivered.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_full_queue_never_drops_priority_alerts() {
        let sink = Arc::new(GatedSink {
            gate: tokio::sync::Semaphore::new(0),
            titles: std::sync::Mutex::new(Vec::new()),
        });
        let config = AlertManagerConfig {
            queue_capacity: 1,
            ..Default::default()
        };
        let manager = AlertManager::new(config, sink.clone());

        // The worker holds the first alert while the rest pile up
        for i in 0..5 {
            manager.warning("supervisor", &format!("noise {}", i), "x").await;
        }
        let aggregate = Alert::new(AlertLevel::Warning, "health", "Self-Heal Actions", "x");
        manager.alert(aggregate.prioritized()).await;
        manager.restart_exhausted("core", 4).await;

        sink.gate.add_permits(100);
        settle().await;

        let titles = sink.titles.lock().unwrap().clone();
        assert!(titles.contains(&"Self-Heal Actions".to_string()));
        assert!(titles.contains(&"Restart Budget Exhausted".to_string()));
        assert!(titles.len() < 7, "overflow was dropped: {:?}", titles);
    }
}
