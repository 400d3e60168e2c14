//! Host remediation primitives
//!
//! The side-effecting half of self-healing: dropping page caches, reclaiming
//! log space and killing runaway processes. Policy lives in the heal engine.

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::adapters::signals;
use crate::config::LogCleanupConfig;
use crate::error::{Result, WardenError};

const DROP_CACHES: &str = "/proc/sys/vm/drop_caches";

#[async_trait]
pub trait Remediator: Send + Sync {
    /// Flush dirty pages and drop reclaimable caches; returns a detail line
    async fn clear_caches(&self) -> Result<String>;

    /// Delete stale rotated logs and truncate oversized active logs
    async fn clean_logs(&self) -> Result<String>;

    /// Forced kill of one process
    async fn kill_process(&self, pid: u32) -> Result<()>;
}

pub struct SystemRemediator {
    logs: LogCleanupConfig,
    drop_caches_path: PathBuf,
}

impl SystemRemediator {
    pub fn new(logs: LogCleanupConfig) -> Self {
        Self {
            logs,
            drop_caches_path: PathBuf::from(DROP_CACHES),
        }
    }

    pub fn with_drop_caches_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.drop_caches_path = path.into();
        self
    }
}

#[async_trait]
impl Remediator for SystemRemediator {
    async fn clear_caches(&self) -> Result<String> {
        let path = self.drop_caches_path.clone();
        tokio::task::spawn_blocking(move || -> Result<String> {
            #[cfg(unix)]
            nix::unistd::sync();
            fs::write(&path, "3")?;
            Ok(format!("dropped page cache via {}", path.display()))
        })
        .await
        .map_err(|e| WardenError::Internal(format!("cache clear task failed: {}", e)))?
    }

    async fn clean_logs(&self) -> Result<String> {
        let logs = self.logs.clone();
        let stats = tokio::task::spawn_blocking(move || clean_log_dirs(&logs, SystemTime::now()))
            .await
            .map_err(|e| WardenError::Internal(format!("log cleanup task failed: {}", e)))?;

        info!(
            "Log cleanup removed {} file(s), truncated {} file(s), reclaimed {} bytes",
            stats.deleted, stats.truncated, stats.reclaimed_bytes
        );
        Ok(stats.to_string())
    }

    async fn kill_process(&self, pid: u32) -> Result<()> {
        signals::force_kill(pid)
    }
}

/// Outcome of one log cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub deleted: usize,
    pub truncated: usize,
    pub reclaimed_bytes: u64,
}

impl std::fmt::Display for CleanupStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "deleted {} stale, truncated {} oversized, reclaimed {} bytes",
            self.deleted, self.truncated, self.reclaimed_bytes
        )
    }
}

/// `app.log.1`, `app.log.2.gz`, `app.old`, `app.gz`
fn is_rotated(name: &str) -> bool {
    if name.ends_with(".gz") || name.ends_with(".old") {
        return true;
    }
    match name.rsplit_once('.') {
        Some((stem, suffix)) => {
            !suffix.is_empty()
                && suffix.chars().all(|c| c.is_ascii_digit())
                && stem.contains(".log")
        }
        None => false,
    }
}

fn is_active_log(name: &str) -> bool {
    name.ends_with(".log")
}

/// One cleanup pass over the configured directories. Missing directories and
/// unreadable entries are skipped.
pub fn clean_log_dirs(config: &LogCleanupConfig, now: SystemTime) -> CleanupStats {
    let stale_after = Duration::from_secs(config.stale_after_days.saturating_mul(86_400));
    let mut stats = CleanupStats::default();

    for dir in &config.dirs {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Skipping log dir {}: {}", dir.display(), e);
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let meta = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            let name = entry.file_name().to_string_lossy().into_owned();

            if is_rotated(&name) {
                let age = meta
                    .modified()
                    .ok()
                    .and_then(|m| now.duration_since(m).ok())
                    .unwrap_or_default();
                if age > stale_after {
                    remove(&path, meta.len(), &mut stats);
                }
            } else if is_active_log(&name) && meta.len() > config.max_file_bytes {
                truncate(&path, meta.len(), &mut stats);
            }
        }
    }

    stats
}

fn remove(path: &Path, len: u64, stats: &mut CleanupStats) {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Deleted stale log {}", path.display());
            stats.deleted += 1;
            stats.reclaimed_bytes += len;
        }
        Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
    }
}

fn truncate(path: &Path, len: u64, stats: &mut CleanupStats) {
    // Truncate in place so writers holding the file keep a valid handle
    let truncated = fs::OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|f| f.set_len(0));
    match truncated {
        Ok(()) => {
            debug!("Truncated oversized log {} ({} bytes)", path.display(), len);
            stats.truncated += 1;
            stats.reclaimed_bytes += len;
        }
        Err(e) => warn!("Failed to truncate {}: {}", path.display(), e),
    }
}
