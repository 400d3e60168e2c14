use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Static declaration of a managed process. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Unique roster key
    pub name: String,
    /// Executable to launch
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Critical specs are restarted automatically and escalate on budget exhaustion
    #[serde(default = "default_critical")]
    pub critical: bool,
    /// Resident memory cap; exceeding it triggers a proactive restart
    #[serde(default)]
    pub max_memory_bytes: Option<u64>,
    /// CPU cap; exceeding it is logged only
    #[serde(default)]
    pub max_cpu_percent: Option<f32>,
}

fn default_critical() -> bool {
    true
}

impl ProcessSpec {
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            critical: true,
            max_memory_bytes: None,
            max_cpu_percent: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn with_max_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = Some(bytes);
        self
    }

    pub fn with_max_cpu_percent(mut self, percent: f32) -> Self {
        self.max_cpu_percent = Some(percent);
        self
    }

    /// Executable file name, used for process-table lookups
    pub fn executable_name(&self) -> &str {
        Path::new(&self.command)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.command)
    }
}

/// Crash-restart budget shared by a roster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Restarts tolerated inside one window before the target is marked failed
    pub max_restarts: u32,
    /// Rolling window; a crash later than this after the last restart renews the budget
    pub restart_window: Duration,
    /// Backoff before respawn
    pub restart_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            restart_window: Duration::from_secs(300),
            restart_delay: Duration::from_secs(5),
        }
    }
}

/// Lifecycle status of a managed process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Not yet started
    Pending,
    /// Live instance present
    Running,
    /// Crashed, waiting out the restart delay
    Restarting,
    /// Intentional termination in progress
    Stopping,
    /// Non-critical process exited and is left down
    Exited,
    /// Restart budget exhausted; only an external reset revives it
    Failed,
    /// Stopped by supervisor shutdown
    Stopped,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Pending => "pending",
            ProcessStatus::Running => "running",
            ProcessStatus::Restarting => "restarting",
            ProcessStatus::Stopping => "stopping",
            ProcessStatus::Exited => "exited",
            ProcessStatus::Failed => "failed",
            ProcessStatus::Stopped => "stopped",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only view of one roster entry, handed out by the supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessView {
    pub name: String,
    pub critical: bool,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub healthy: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub last_restart_at: Option<DateTime<Utc>>,
    /// Restarts triggered by resource policing; never counted against the crash budget
    pub resource_restarts: u32,
    /// Every spawn attempt, successful or not
    pub start_attempts: u32,
    pub memory_bytes: u64,
    pub cpu_percent: f32,
}
