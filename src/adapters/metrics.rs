//! Host and process metrics
//!
//! The only place that touches OS metric sources. `sysinfo` covers memory, CPU,
//! disks, load and the process table; established connections and temperature
//! are read from procfs/sysfs on Linux and reported as absent elsewhere.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use sysinfo::{
    CpuRefreshKind, Disks, MemoryRefreshKind, Pid, ProcessesToUpdate, RefreshKind, System,
};
use tracing::debug;

use crate::domain::{HostSnapshot, LoadAverage, ProcessUsage};
use crate::error::{Result, WardenError};

const PROC_NET_TCP: [&str; 2] = ["/proc/net/tcp", "/proc/net/tcp6"];
const THERMAL_ROOT: &str = "/sys/class/thermal";

/// Typed metrics boundary consumed by the governor, supervisor and heal engine
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Sample host-wide resources. CPU is utilisation since the previous call.
    async fn host_snapshot(&self) -> Result<HostSnapshot>;

    /// Resident memory and CPU of one process; `None` once it has exited
    async fn process_usage(&self, pid: u32) -> Option<ProcessUsage>;

    /// PIDs whose process name matches `name`
    async fn pids_named(&self, name: &str) -> Vec<u32>;

    /// Processes whose CPU stayed above `min_cpu_percent` across `window`
    async fn busy_processes(&self, min_cpu_percent: f32, window: Duration) -> Vec<ProcessUsage>;
}

/// `sysinfo`-backed provider. Give each loop its own instance so CPU deltas
/// are measured over that loop's interval.
pub struct SysinfoProvider {
    system: Arc<Mutex<System>>,
    disk_mount: PathBuf,
}

impl SysinfoProvider {
    pub fn new(disk_mount: impl Into<PathBuf>) -> Self {
        let mut system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        // Baseline for the first CPU delta
        system.refresh_cpu_usage();

        Self {
            system: Arc::new(Mutex::new(system)),
            disk_mount: disk_mount.into(),
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut System) -> T + Send + 'static,
    {
        let system = self.system.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&system);
            f(&mut guard)
        })
        .await
        .map_err(|e| WardenError::Internal(format!("metrics task failed: {}", e)))
    }
}

fn lock(system: &Mutex<System>) -> MutexGuard<'_, System> {
    // A panic mid-refresh leaves the System usable; keep sampling
    system.lock().unwrap_or_else(PoisonError::into_inner)
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

fn usage_of(pid: Pid, process: &sysinfo::Process) -> ProcessUsage {
    ProcessUsage {
        pid: pid.as_u32(),
        name: process.name().to_string_lossy().into_owned(),
        memory_bytes: process.memory(),
        cpu_percent: process.cpu_usage(),
    }
}

#[async_trait]
impl MetricsProvider for SysinfoProvider {
    async fn host_snapshot(&self) -> Result<HostSnapshot> {
        let (used, total, cpu_percent, cpu_count) = self
            .blocking(|sys| {
                sys.refresh_memory();
                sys.refresh_cpu_usage();
                (
                    sys.used_memory(),
                    sys.total_memory(),
                    sys.global_cpu_usage() as f64,
                    sys.cpus().len(),
                )
            })
            .await?;

        let mount = self.disk_mount.clone();
        let (disk_mount, disk_percent, load, temperature_celsius, established_connections) =
            tokio::task::spawn_blocking(move || {
                let disks = Disks::new_with_refreshed_list();
                let volumes: Vec<(PathBuf, u64, u64)> = disks
                    .list()
                    .iter()
                    .map(|d| {
                        (
                            d.mount_point().to_path_buf(),
                            d.total_space(),
                            d.available_space(),
                        )
                    })
                    .collect();
                let (disk_mount, disk_percent) = disk_usage(&volumes, &mount)
                    .unwrap_or_else(|| (mount.display().to_string(), 0.0));

                let load = System::load_average();
                let established: u64 = PROC_NET_TCP
                    .iter()
                    .filter_map(|path| std::fs::read_to_string(path).ok())
                    .map(|content| count_established(&content))
                    .sum();

                (
                    disk_mount,
                    disk_percent,
                    LoadAverage {
                        one: load.one,
                        five: load.five,
                        fifteen: load.fifteen,
                    },
                    read_max_temperature(Path::new(THERMAL_ROOT)),
                    established,
                )
            })
            .await
            .map_err(|e| WardenError::Internal(format!("metrics task failed: {}", e)))?;

        Ok(HostSnapshot {
            timestamp: Utc::now(),
            memory_used_bytes: used,
            memory_total_bytes: total,
            memory_percent: percent(used, total),
            cpu_percent,
            cpu_count,
            disk_mount,
            disk_percent,
            load_average: load,
            temperature_celsius,
            established_connections,
        })
    }

    async fn process_usage(&self, pid: u32) -> Option<ProcessUsage> {
        self.blocking(move |sys| {
            let pid = Pid::from_u32(pid);
            sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            sys.process(pid).map(|p| usage_of(pid, p))
        })
        .await
        .ok()
        .flatten()
    }

    async fn pids_named(&self, name: &str) -> Vec<u32> {
        let name = name.to_string();
        self.blocking(move |sys| {
            sys.refresh_processes(ProcessesToUpdate::All, true);
            let mut pids: Vec<u32> = sys
                .processes()
                .iter()
                .filter(|(_, p)| p.name().to_string_lossy() == name.as_str())
                .map(|(pid, _)| pid.as_u32())
                .collect();
            pids.sort_unstable();
            pids
        })
        .await
        .unwrap_or_default()
    }

    async fn busy_processes(&self, min_cpu_percent: f32, window: Duration) -> Vec<ProcessUsage> {
        if self
            .blocking(|sys| {
                sys.refresh_processes(ProcessesToUpdate::All, true);
            })
            .await
            .is_err()
        {
            return Vec::new();
        }

        tokio::time::sleep(window).await;

        let busy = self
            .blocking(move |sys| {
                sys.refresh_processes(ProcessesToUpdate::All, true);
                sys.processes()
                    .iter()
                    .filter(|(_, p)| p.cpu_usage() > min_cpu_percent)
                    .map(|(pid, p)| usage_of(*pid, p))
                    .collect::<Vec<_>>()
            })
            .await
            .unwrap_or_default();

        debug!(
            "{} process(es) above {:.0}% CPU over {:?}",
            busy.len(),
            min_cpu_percent,
            window
        );
        busy
    }
}

/// Usage of the volume holding `target`: exact mount match, else the longest
/// mount point that prefixes it.
pub fn disk_usage(volumes: &[(PathBuf, u64, u64)], target: &Path) -> Option<(String, f64)> {
    volumes
        .iter()
        .filter(|(mount, total, _)| *total > 0 && target.starts_with(mount))
        .max_by_key(|(mount, _, _)| mount.components().count())
        .map(|(mount, total, available)| {
            (
                mount.display().to_string(),
                percent(total.saturating_sub(*available), *total),
            )
        })
}

/// Count ESTABLISHED (state `01`) sockets in a `/proc/net/tcp`-format table
pub fn count_established(content: &str) -> u64 {
    content
        .lines()
        .skip(1)
        .filter(|line| line.split_whitespace().nth(3) == Some("01"))
        .count() as u64
}

/// Highest thermal-zone reading in °C under a sysfs thermal root
pub fn read_max_temperature(root: &Path) -> Option<f64> {
    let entries = std::fs::read_dir(root).ok()?;
    entries
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("thermal_zone"))
        .filter_map(|e| std::fs::read_to_string(e.path().join("temp")).ok())
        .filter_map(|raw| raw.trim().parse::<f64>().ok())
        .map(|millidegrees| millidegrees / 1000.0)
        .reduce(f64::max)
}
