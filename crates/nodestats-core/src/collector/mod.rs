//! Host counter sources for the sampler.
//!
//! This module provides the OS-facing side of the agent: reading memory, CPU,
//! disk, network and process figures, with support for mocking so the whole
//! pipeline can be exercised without a real host.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      Sampler                        │
//! └──────────────────────────┬──────────────────────────┘
//!                            │
//!                    ┌───────▼───────┐
//!                    │  SystemProbe  │ (trait)
//!                    └───────┬───────┘
//!                            │
//!                 ┌──────────▼──────────┐
//!                 │  ProcfsProbe<F>     │
//!                 │  - /proc/meminfo    │
//!                 │  - /proc/stat       │
//!                 │  - /proc/diskstats  │
//!                 │  - /proc/net/dev    │
//!                 │  - /proc/[pid]/stat │
//!                 └──────────┬──────────┘
//!                            │
//!                    ┌───────▼───────┐
//!                    │  FileSystem   │ (trait)
//!                    └───────┬───────┘
//!                  ┌─────────┴─────────┐
//!           ┌──────▼──────┐     ┌──────▼──────┐
//!           │   RealFs    │     │   MockFs    │
//!           └─────────────┘     └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use nodestats_core::collector::{MockFs, ProcfsProbe, SystemProbe};
//!
//! let fs = MockFs::typical_node();
//! let mut probe = ProcfsProbe::new(fs, "/proc");
//! let memory = probe.memory().unwrap();
//! assert!(memory.total > 0);
//! ```

pub mod mock;
pub mod procfs;
pub mod traits;

use std::path::Path;

use crate::rates::IoCounters;
use crate::snapshot::{DiskUsage, MemoryUsage, ProcessUsage};

pub use mock::MockFs;
pub use procfs::{CpuSampler, ProcfsProbe};
pub use traits::{FileSystem, FsSpace, RealFs};

/// Error type for subsystem query failures.
#[derive(Debug)]
pub enum CollectError {
    /// I/O error reading counter files.
    Io(std::io::Error),
    /// Counter file content could not be parsed.
    Parse(String),
    /// The query is not available on this host.
    Unsupported(String),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::Io(e) => write!(f, "I/O error: {}", e),
            CollectError::Parse(msg) => write!(f, "parse error: {}", msg),
            CollectError::Unsupported(what) => write!(f, "unsupported: {}", what),
        }
    }
}

impl std::error::Error for CollectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CollectError {
    fn from(e: std::io::Error) -> Self {
        CollectError::Io(e)
    }
}

impl From<procfs::parser::ParseError> for CollectError {
    fn from(e: procfs::parser::ParseError) -> Self {
        CollectError::Parse(e.message)
    }
}

/// Source of raw host figures queried by the sampler once per tick.
///
/// Counter methods return cumulative values; converting them into rates is
/// the sampler's job.
pub trait SystemProbe: Send {
    /// Current physical memory usage.
    fn memory(&mut self) -> Result<MemoryUsage, CollectError>;

    /// Busy percentage of each CPU core since the previous call.
    fn cpu_percents(&mut self) -> Result<Vec<f64>, CollectError>;

    /// Capacity of each of the given mount points. Paths that cannot be
    /// queried are skipped.
    fn disk_usage(&mut self, paths: &[String]) -> Result<Vec<DiskUsage>, CollectError>;

    /// Cumulative bytes read from and written to block devices.
    fn disk_counters(&mut self) -> Result<IoCounters, CollectError>;

    /// Cumulative bytes received (read) and sent (write) on all interfaces.
    fn net_counters(&mut self) -> Result<IoCounters, CollectError>;

    /// Processes whose name matches one of `names`, case-insensitively.
    fn processes(&mut self, names: &[String]) -> Result<Vec<ProcessUsage>, CollectError>;
}

/// Default mount points to report capacity for.
///
/// Windows nodes watch `C:/` and `D:/`. Elsewhere the OS disk `/` is watched
/// together with the resource disk at `/mnt/resources`, or `/mnt` when the
/// former does not exist.
pub fn watched_disk_paths(fs: &dyn FileSystem) -> Vec<String> {
    if cfg!(windows) {
        return vec!["C:/".to_string(), "D:/".to_string()];
    }

    let user_disk = if fs.exists(Path::new("/mnt/resources")) {
        "/mnt/resources"
    } else {
        "/mnt"
    };
    vec!["/".to_string(), user_disk.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(windows))]
    #[test]
    fn watched_paths_prefer_resource_disk() {
        let fs = MockFs::new();
        assert_eq!(watched_disk_paths(&fs), vec!["/", "/mnt"]);

        fs.add_dir("/mnt/resources");
        assert_eq!(watched_disk_paths(&fs), vec!["/", "/mnt/resources"]);
    }

    #[test]
    fn collect_error_display() {
        let err = CollectError::from(procfs::parser::ParseError::new("bad line"));
        assert_eq!(err.to_string(), "parse error: bad line");

        let err = CollectError::from(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "gone",
        ));
        assert!(err.to_string().starts_with("I/O error"));
    }
}
