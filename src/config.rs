use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{ProcessSpec, ResourceThresholds, RestartPolicy};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/warden/warden.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub supervisor: SupervisorConfig,
    pub governor: GovernorConfig,
    pub health: HealthConfig,
    pub alerts: AlertsConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Resource-policing poll interval
    pub poll_interval_secs: u64,
    /// Time between the graceful signal and the forced kill
    pub grace_period_secs: u64,
    pub max_restarts: u32,
    pub restart_window_secs: u64,
    pub restart_delay_ms: u64,
    /// Managed process roster
    pub processes: Vec<ProcessSpec>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            grace_period_secs: 10,
            max_restarts: 3,
            restart_window_secs: 300,
            restart_delay_ms: 5000,
            processes: Vec::new(),
        }
    }
}

impl SupervisorConfig {
    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            max_restarts: self.max_restarts,
            restart_window: Duration::from_secs(self.restart_window_secs),
            restart_delay: Duration::from_millis(self.restart_delay_ms),
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub sample_interval_secs: u64,
    /// Emit a status summary every N samples
    pub summary_every_ticks: u32,
    /// Volume whose usage is governed
    pub disk_mount: String,
    pub thresholds: ResourceThresholds,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 30,
            summary_every_ticks: 20,
            disk_mount: "/".to_string(),
            thresholds: ResourceThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Deep-health cycle interval
    pub interval_secs: u64,
    /// Liveness marker interval
    pub heartbeat_interval_secs: u64,
    /// Upper bound on every external probe and remediation command
    pub probe_timeout_secs: u64,
    /// Services probed and restarted through the service manager
    pub services: Vec<String>,
    pub firewall_service: Option<String>,
    pub intrusion_prevention_service: Option<String>,
    /// Memory usage that triggers a cache clear
    pub critical_memory_percent: f64,
    /// Disk usage that triggers log cleanup
    pub critical_disk_percent: f64,
    pub runaway: RunawayConfig,
    pub logs: LogCleanupConfig,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            heartbeat_interval_secs: 30,
            probe_timeout_secs: 10,
            services: Vec::new(),
            firewall_service: Some("ufw".to_string()),
            intrusion_prevention_service: Some("fail2ban".to_string()),
            critical_memory_percent: 95.0,
            critical_disk_percent: 95.0,
            runaway: RunawayConfig::default(),
            logs: LogCleanupConfig::default(),
        }
    }
}

impl HealthConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunawayConfig {
    /// Sustained CPU usage considered pathological
    pub cpu_percent: f32,
    /// Sampling window over which CPU must stay above the limit
    pub sample_window_ms: u64,
    /// Process names the engine is allowed to kill
    pub targets: Vec<String>,
}

impl Default for RunawayConfig {
    fn default() -> Self {
        Self {
            cpu_percent: 90.0,
            sample_window_ms: 2000,
            targets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogCleanupConfig {
    pub dirs: Vec<PathBuf>,
    /// Rotated logs older than this are deleted
    pub stale_after_days: u64,
    /// Active logs larger than this are truncated
    pub max_file_bytes: u64,
}

impl Default for LogCleanupConfig {
    fn default() -> Self {
        Self {
            dirs: vec![PathBuf::from("/var/log/warden")],
            stale_after_days: 7,
            max_file_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Webhook endpoint; alerts are log-only when absent
    pub webhook_url: Option<String>,
    pub delivery_timeout_secs: u64,
    /// Forward info-level alerts (status summaries, recoveries) to the sink
    pub notify_info: bool,
    pub max_alerts_per_minute: u32,
    pub queue_capacity: usize,
    /// Consecutive delivery failures before degrading to log-only
    pub failure_threshold: u32,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            delivery_timeout_secs: 10,
            notify_info: false,
            max_alerts_per_minute: 20,
            queue_capacity: 64,
            failure_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_dir: PathBuf,
    /// Retained HealingAction records
    pub max_healing_actions: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/warden"),
            max_healing_actions: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `info,warden=debug`; `RUST_LOG` overrides it
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Directory for the daily rotating log file
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,warden=debug".to_string(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file; a missing file yields defaults
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::from(path.as_ref().to_path_buf()).required(false))
            // Override with environment variables (WARDEN_GOVERNOR__SAMPLE_INTERVAL_SECS, etc.)
            .add_source(
                Environment::with_prefix("WARDEN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let mut names = HashSet::new();
        for spec in &self.supervisor.processes {
            if spec.name.trim().is_empty() {
                errors.push("process name must not be empty".to_string());
            }
            if !names.insert(spec.name.as_str()) {
                errors.push(format!("duplicate process name: {}", spec.name));
            }
            if spec.command.trim().is_empty() {
                errors.push(format!("process {} has an empty command", spec.name));
            }
            if spec.max_memory_bytes == Some(0) {
                errors.push(format!("process {} has max_memory_bytes = 0", spec.name));
            }
        }

        if self.supervisor.poll_interval_secs == 0 {
            errors.push("supervisor.poll_interval_secs must be positive".to_string());
        }
        if self.governor.sample_interval_secs == 0 {
            errors.push("governor.sample_interval_secs must be positive".to_string());
        }
        if self.governor.summary_every_ticks == 0 {
            errors.push("governor.summary_every_ticks must be positive".to_string());
        }
        if self.health.interval_secs == 0 || self.health.heartbeat_interval_secs == 0 {
            errors.push("health intervals must be positive".to_string());
        }
        if self.health.probe_timeout_secs == 0 {
            errors.push("health.probe_timeout_secs must be positive".to_string());
        }
        if self.health.interval_secs < self.governor.sample_interval_secs {
            errors.push(
                "health.interval_secs should not be shorter than governor.sample_interval_secs"
                    .to_string(),
            );
        }

        let thresholds = &self.governor.thresholds;
        for (label, value) in [
            ("memory_percent", thresholds.memory_percent),
            ("cpu_percent", thresholds.cpu_percent),
            ("disk_percent", thresholds.disk_percent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                errors.push(format!("governor.thresholds.{label} must be in 0..=100"));
            }
        }
        if self.health.critical_memory_percent <= thresholds.memory_percent {
            errors.push(
                "health.critical_memory_percent must be above the governor memory threshold"
                    .to_string(),
            );
        }
        if self.health.critical_disk_percent <= thresholds.disk_percent {
            errors.push(
                "health.critical_disk_percent must be above the governor disk threshold"
                    .to_string(),
            );
        }

        if self.alerts.queue_capacity == 0 {
            errors.push("alerts.queue_capacity must be positive".to_string());
        }
        if self.storage.max_healing_actions == 0 {
            errors.push("storage.max_healing_actions must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
