//! Per-tick node statistics.
//!
//! A [`NodeStatsSnapshot`] is produced once per sampler tick and never mutated
//! afterwards. Every subsystem field is optional: `None` means the subsystem
//! was disabled or its query failed during that tick.

use std::time::Instant;

use serde::Serialize;

use crate::gpu::GpuUsage;
use crate::rates::IoRate;

/// Physical memory figures, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub total: u64,
    pub available: u64,
    pub used: u64,
}

/// Capacity of one watched mount point, in bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiskUsage {
    pub path: String,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub used_percent: f64,
}

impl DiskUsage {
    pub fn new(path: impl Into<String>, total: u64, used: u64, free: u64) -> Self {
        let used_percent = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };
        Self {
            path: path.into(),
            total,
            used,
            free,
            used_percent,
        }
    }
}

/// Resource usage of one monitored process.
///
/// `cpu_percent` is supplied by the process source; nothing is tracked
/// across ticks for a pid.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessUsage {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    /// Virtual memory size in bytes.
    pub memory_bytes: u64,
}

/// Immutable collection of all subsystem readings taken during one tick.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatsSnapshot {
    /// Wall-clock time of the tick (seconds since Unix epoch).
    pub timestamp: i64,
    /// Monotonic time of the tick, used for rate and window arithmetic.
    #[serde(skip)]
    pub taken_at: Instant,
    pub memory: Option<MemoryUsage>,
    pub cpu_percents: Option<Vec<f64>>,
    pub disk_usage: Option<Vec<DiskUsage>>,
    pub disk_io: Option<IoRate>,
    pub net_io: Option<IoRate>,
    pub gpus: Option<Vec<GpuUsage>>,
    pub processes: Option<Vec<ProcessUsage>>,
}

impl NodeStatsSnapshot {
    /// Creates a snapshot with every subsystem absent.
    pub fn empty(timestamp: i64, taken_at: Instant) -> Self {
        Self {
            timestamp,
            taken_at,
            memory: None,
            cpu_percents: None,
            disk_usage: None,
            disk_io: None,
            net_io: None,
            gpus: None,
            processes: None,
        }
    }

    /// Average of the per-core CPU percentages, if any were collected.
    pub fn cpu_average(&self) -> Option<f64> {
        let cpus = self.cpu_percents.as_ref()?;
        if cpus.is_empty() {
            return None;
        }
        Some(cpus.iter().sum::<f64>() / cpus.len() as f64)
    }

    /// Short description of which subsystems are present, for logging.
    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if self.memory.is_some() {
            parts.push("memory".to_string());
        }
        if let Some(cpus) = &self.cpu_percents {
            parts.push(format!("{} cpus", cpus.len()));
        }
        if let Some(disks) = &self.disk_usage {
            parts.push(format!("{} disks", disks.len()));
        }
        if self.disk_io.is_some() {
            parts.push("disk io".to_string());
        }
        if self.net_io.is_some() {
            parts.push("net io".to_string());
        }
        if let Some(gpus) = &self.gpus {
            parts.push(format!("{} gpus", gpus.len()));
        }
        if let Some(processes) = &self.processes {
            parts.push(format!("{} processes", processes.len()));
        }

        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_usage_percent() {
        let usage = DiskUsage::new("/", 200, 50, 150);
        assert_eq!(usage.used_percent, 25.0);
        assert_eq!(DiskUsage::new("/mnt", 0, 0, 0).used_percent, 0.0);
    }

    #[test]
    fn cpu_average_ignores_missing_and_empty() {
        let mut snapshot = NodeStatsSnapshot::empty(0, Instant::now());
        assert_eq!(snapshot.cpu_average(), None);

        snapshot.cpu_percents = Some(Vec::new());
        assert_eq!(snapshot.cpu_average(), None);

        snapshot.cpu_percents = Some(vec![10.0, 30.0]);
        assert_eq!(snapshot.cpu_average(), Some(20.0));
    }

    #[test]
    fn describe_lists_present_subsystems() {
        let mut snapshot = NodeStatsSnapshot::empty(0, Instant::now());
        snapshot.cpu_percents = Some(vec![1.0, 2.0]);
        snapshot.processes = Some(vec![ProcessUsage::default()]);
        snapshot.disk_io = Some(IoRate::default());

        let desc = snapshot.describe();
        assert!(desc.contains("2 cpus"));
        assert!(desc.contains("1 processes"));
        assert!(desc.contains("disk io"));
        assert!(!desc.contains("memory"));
    }

    #[test]
    fn serializes_without_instant() {
        let mut snapshot = NodeStatsSnapshot::empty(1_700_000_000, Instant::now());
        snapshot.memory = Some(MemoryUsage {
            total: 10,
            available: 4,
            used: 6,
        });
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["timestamp"], 1_700_000_000);
        assert_eq!(json["memory"]["used"], 6);
        assert!(json.get("taken_at").is_none());
        assert!(json["gpus"].is_null());
    }
}
