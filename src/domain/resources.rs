use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Host-wide metrics governed by thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Memory,
    Cpu,
    Disk,
    Load,
    Temperature,
    Connections,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Memory,
        Metric::Cpu,
        Metric::Disk,
        Metric::Load,
        Metric::Temperature,
        Metric::Connections,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Memory => "memory",
            Metric::Cpu => "cpu",
            Metric::Disk => "disk",
            Metric::Load => "load",
            Metric::Temperature => "temperature",
            Metric::Connections => "connections",
        }
    }

    /// Unit suffix used in alert text
    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Memory | Metric::Cpu | Metric::Disk => "%",
            Metric::Load => " per core",
            Metric::Temperature => "°C",
            Metric::Connections => " connections",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// One sample of host resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub timestamp: DateTime<Utc>,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub memory_percent: f64,
    /// Utilisation since the previous sample
    pub cpu_percent: f64,
    pub cpu_count: usize,
    pub disk_mount: String,
    pub disk_percent: f64,
    pub load_average: LoadAverage,
    #[serde(default)]
    pub temperature_celsius: Option<f64>,
    pub established_connections: u64,
}

impl HostSnapshot {
    /// Value of a governed metric, `None` when the host does not expose it
    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Memory => Some(self.memory_percent),
            Metric::Cpu => Some(self.cpu_percent),
            Metric::Disk => Some(self.disk_percent),
            Metric::Load => {
                if self.cpu_count == 0 {
                    None
                } else {
                    Some(self.load_average.one / self.cpu_count as f64)
                }
            }
            Metric::Temperature => self.temperature_celsius,
            Metric::Connections => Some(self.established_connections as f64),
        }
    }

    /// Compact one-line summary for status logs
    pub fn summary(&self) -> String {
        let temp = self
            .temperature_celsius
            .map(|t| format!("{:.1}°C", t))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "mem {:.1}% | cpu {:.1}% | disk({}) {:.1}% | load {:.2}/{:.2}/{:.2} | temp {} | conns {}",
            self.memory_percent,
            self.cpu_percent,
            self.disk_mount,
            self.disk_percent,
            self.load_average.one,
            self.load_average.five,
            self.load_average.fifteen,
            temp,
            self.established_connections
        )
    }
}

/// Resource usage of a single process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessUsage {
    pub pid: u32,
    pub name: String,
    pub memory_bytes: u64,
    pub cpu_percent: f32,
}

/// Warning thresholds evaluated by the resource governor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceThresholds {
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub disk_percent: f64,
    pub temperature_celsius: f64,
    /// Absolute cap on established network connections
    pub max_connections: u64,
    /// One-minute load average divided by core count; disabled when absent
    pub load_per_core: Option<f64>,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            memory_percent: 85.0,
            cpu_percent: 90.0,
            disk_percent: 90.0,
            temperature_celsius: 80.0,
            max_connections: 1000,
            load_per_core: None,
        }
    }
}

impl ResourceThresholds {
    pub fn threshold(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Memory => Some(self.memory_percent),
            Metric::Cpu => Some(self.cpu_percent),
            Metric::Disk => Some(self.disk_percent),
            Metric::Load => self.load_per_core,
            Metric::Temperature => Some(self.temperature_celsius),
            Metric::Connections => Some(self.max_connections as f64),
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_snapshot(memory_percent: f64) -> HostSnapshot {
    HostSnapshot {
        timestamp: Utc::now(),
        memory_used_bytes: 0,
        memory_total_bytes: 0,
        memory_percent,
        cpu_percent: 10.0,
        cpu_count: 4,
        disk_mount: "/".to_string(),
        disk_percent: 40.0,
        load_average: LoadAverage {
            one: 0.5,
            five: 0.4,
            fifteen: 0.3,
        },
        temperature_celsius: None,
        established_connections: 12,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_is_normalised_per_core() {
        let mut snap = sample_snapshot(50.0);
        snap.load_average.one = 6.0;
        assert_eq!(snap.value(Metric::Load), Some(1.5));

        snap.cpu_count = 0;
        assert_eq!(snap.value(Metric::Load), None);
    }

    #[test]
    fn test_missing_temperature_is_not_governed() {
        let snap = sample_snapshot(50.0);
        assert_eq!(snap.value(Metric::Temperature), None);
    }

    #[test]
    fn test_load_threshold_disabled_by_default() {
        let thresholds = ResourceThresholds::default();
        assert_eq!(thresholds.threshold(Metric::Load), None);
        assert_eq!(thresholds.threshold(Metric::Memory), Some(85.0));
        assert_eq!(thresholds.threshold(Metric::Connections), Some(1000.0));
    }
}
