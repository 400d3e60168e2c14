//! State Store
//!
//! Durable records under the state directory:
//! - `heartbeat.json`: liveness marker, overwritten every heartbeat
//! - `health_report.json`: last deep-health report, overwritten every cycle
//! - `supervisor_state.json`: restart bookkeeping per process, overwritten on change
//! - `healing_actions.jsonl`: append-only remediation log, capped at N records
//!
//! Overwritten documents go through write-then-rename so readers never see a
//! partial file.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{HealingAction, HealthReport, ProcessView};
use crate::error::Result;

const HEARTBEAT_FILE: &str = "heartbeat.json";
const HEALTH_REPORT_FILE: &str = "health_report.json";
const SUPERVISOR_STATE_FILE: &str = "supervisor_state.json";
const HEALING_LOG_FILE: &str = "healing_actions.jsonl";

/// Lightweight liveness marker for local diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub pid: u32,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorRecord {
    pub updated_at: DateTime<Utc>,
    pub processes: Vec<ProcessView>,
}

pub struct StateStore {
    dir: PathBuf,
    max_healing_actions: usize,
    /// Serializes appends and retention rewrites of the audit log
    log_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>, max_healing_actions: usize) -> Self {
        Self {
            dir: dir.into(),
            max_healing_actions: max_healing_actions.max(1),
            log_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write_atomic<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let target = self.dir.join(file);
        let tmp = self.dir.join(format!(".{}.tmp", file));

        let bytes = serde_json::to_vec_pretty(value)?;
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &target).await?;
        debug!("Wrote {}", target.display());
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>> {
        match fs::read(self.dir.join(file)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_heartbeat(&self, heartbeat: &Heartbeat) -> Result<()> {
        self.write_atomic(HEARTBEAT_FILE, heartbeat).await
    }

    pub async fn read_heartbeat(&self) -> Result<Option<Heartbeat>> {
        self.read_json(HEARTBEAT_FILE).await
    }

    pub async fn write_health_report(&self, report: &HealthReport) -> Result<()> {
        self.write_atomic(HEALTH_REPORT_FILE, report).await
    }

    pub async fn read_health_report(&self) -> Result<Option<HealthReport>> {
        self.read_json(HEALTH_REPORT_FILE).await
    }

    pub async fn write_supervisor_state(&self, processes: &[ProcessView]) -> Result<()> {
        let record = SupervisorRecord {
            updated_at: Utc::now(),
            processes: processes.to_vec(),
        };
        self.write_atomic(SUPERVISOR_STATE_FILE, &record).await
    }

    pub async fn read_supervisor_state(&self) -> Result<Option<SupervisorRecord>> {
        self.read_json(SUPERVISOR_STATE_FILE).await
    }

    /// Append one record, then enforce the retention cap
    pub async fn append_healing_action(&self, action: &HealingAction) -> Result<()> {
        let _guard = self.log_lock.lock().await;
        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(HEALING_LOG_FILE);

        let mut line = serde_json::to_string(action)?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        drop(file);

        let content = fs::read_to_string(&path).await?;
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.len() > self.max_healing_actions {
            let keep = &lines[lines.len() - self.max_healing_actions..];
            let mut trimmed = keep.join("\n");
            trimmed.push('\n');

            let tmp = self.dir.join(format!(".{}.tmp", HEALING_LOG_FILE));
            fs::write(&tmp, trimmed).await?;
            fs::rename(&tmp, &path).await?;
            debug!(
                "Healing log trimmed from {} to {} records",
                lines.len(),
                keep.len()
            );
        }
        Ok(())
    }

    /// Most recent records, oldest first. Corrupt lines are skipped.
    pub async fn read_healing_actions(&self, limit: usize) -> Result<Vec<HealingAction>> {
        let content = match fs::read_to_string(self.dir.join(HEALING_LOG_FILE)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut actions: Vec<HealingAction> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(action) => Some(action),
                Err(e) => {
                    warn!("Skipping corrupt healing log line: {}", e);
                    None
                }
            })
            .collect();

        if actions.len() > limit {
            actions.drain(..actions.len() - limit);
        }
        Ok(actions)
    }
}
