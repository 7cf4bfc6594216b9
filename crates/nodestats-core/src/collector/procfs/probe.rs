//! [`SystemProbe`] implementation backed by the Linux `/proc` filesystem.

use std::path::Path;

use tracing::{debug, trace};

use crate::collector::procfs::cpu::CpuSampler;
use crate::collector::procfs::parser::{
    parse_cpu_stat, parse_diskstats, parse_meminfo, parse_net_dev, parse_proc_stat, parse_uptime,
};
use crate::collector::traits::FileSystem;
use crate::collector::{CollectError, SystemProbe};
use crate::rates::IoCounters;
use crate::snapshot::{DiskUsage, MemoryUsage, ProcessUsage};

/// Clock ticks per second (USER_HZ). Standard value for Linux.
const CLK_TCK: u64 = 100;

/// Size of a `/proc/diskstats` sector, independent of the device.
const SECTOR_SIZE: u64 = 512;

/// Virtual or stacked block devices whose I/O is already counted on the
/// disks underneath.
const VIRTUAL_DEVICE_PREFIXES: [&str; 5] = ["loop", "ram", "zram", "dm-", "md"];

/// Whether `name` is a physical whole disk rather than a partition of one of
/// `devices` or a virtual device.
///
/// A partition is named after its disk plus a number, with a `p` separator
/// when the disk name itself ends in a digit (`sda1`, `nvme0n1p2`).
fn is_whole_disk(name: &str, devices: &[&str]) -> bool {
    if VIRTUAL_DEVICE_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return false;
    }
    let is_number = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    !devices.iter().any(|parent| {
        *parent != name
            && name.strip_prefix(parent).is_some_and(|rest| {
                is_number(rest) || rest.strip_prefix('p').is_some_and(is_number)
            })
    })
}

/// Reads host figures from `/proc`.
pub struct ProcfsProbe<F: FileSystem> {
    fs: F,
    proc_path: String,
    cpu: CpuSampler,
}

impl<F: FileSystem> ProcfsProbe<F> {
    /// Creates a new probe.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `proc_path` - Base path to proc filesystem (usually "/proc")
    pub fn new(fs: F, proc_path: impl Into<String>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            cpu: CpuSampler::new(),
        }
    }

    /// The filesystem this probe reads from.
    pub fn fs(&self) -> &F {
        &self.fs
    }

    fn read(&self, relative: &str) -> Result<String, CollectError> {
        let path = format!("{}/{}", self.proc_path, relative);
        Ok(self.fs.read_to_string(Path::new(&path))?)
    }

    fn process_usage(&self, pid: u32, uptime_secs: f64) -> Option<ProcessUsage> {
        // Any read failure means the process exited mid-enumeration.
        let content = self.read(&format!("{}/stat", pid)).ok()?;
        let stat = parse_proc_stat(&content).ok()?;

        let cpu_secs = (stat.utime + stat.stime) as f64 / CLK_TCK as f64;
        let lifetime_secs = uptime_secs - stat.starttime as f64 / CLK_TCK as f64;
        let cpu_percent = if lifetime_secs > 0.0 {
            cpu_secs / lifetime_secs * 100.0
        } else {
            0.0
        };

        Some(ProcessUsage {
            pid,
            name: self.process_name(pid, stat.comm),
            cpu_percent,
            memory_bytes: stat.vsize,
        })
    }

    fn process_name(&self, pid: u32, comm_from_stat: String) -> String {
        self.read(&format!("{}/comm", pid))
            .map(|comm| comm.trim_end_matches('\n').to_string())
            .ok()
            .filter(|comm| !comm.is_empty())
            .unwrap_or(comm_from_stat)
    }
}

impl<F: FileSystem> SystemProbe for ProcfsProbe<F> {
    fn memory(&mut self) -> Result<MemoryUsage, CollectError> {
        let info = parse_meminfo(&self.read("meminfo")?)?;

        let total = info.mem_total * 1024;
        let available = info
            .mem_available
            .unwrap_or(info.mem_free + info.buffers + info.cached)
            * 1024;
        let available = available.min(total);

        Ok(MemoryUsage {
            total,
            available,
            used: total - available,
        })
    }

    fn cpu_percents(&mut self) -> Result<Vec<f64>, CollectError> {
        let stats = parse_cpu_stat(&self.read("stat")?)?;
        Ok(self.cpu.sample(&stats))
    }

    fn disk_usage(&mut self, paths: &[String]) -> Result<Vec<DiskUsage>, CollectError> {
        let mut usages = Vec::with_capacity(paths.len());
        for path in paths {
            match self.fs.space(Path::new(path)) {
                Ok(space) => usages.push(DiskUsage::new(
                    path.clone(),
                    space.total,
                    space.used(),
                    space.free,
                )),
                Err(e) => debug!("Disk usage for {} unavailable: {}", path, e),
            }
        }
        Ok(usages)
    }

    fn disk_counters(&mut self) -> Result<IoCounters, CollectError> {
        let disks = parse_diskstats(&self.read("diskstats")?)?;
        let names: Vec<&str> = disks.iter().map(|d| d.device.as_str()).collect();
        Ok(disks
            .iter()
            .filter(|disk| is_whole_disk(&disk.device, &names))
            .fold(IoCounters::default(), |acc, disk| IoCounters {
                read: acc.read.saturating_add(disk.read_sectors * SECTOR_SIZE),
                write: acc.write.saturating_add(disk.write_sectors * SECTOR_SIZE),
            }))
    }

    fn net_counters(&mut self) -> Result<IoCounters, CollectError> {
        let devices = parse_net_dev(&self.read("net/dev")?)?;
        if devices.is_empty() {
            return Err(CollectError::Parse("no interfaces in net/dev".to_string()));
        }
        Ok(devices.iter().fold(IoCounters::default(), |acc, dev| IoCounters {
            read: acc.read.saturating_add(dev.rx_bytes),
            write: acc.write.saturating_add(dev.tx_bytes),
        }))
    }

    fn processes(&mut self, names: &[String]) -> Result<Vec<ProcessUsage>, CollectError> {
        let uptime = parse_uptime(&self.read("uptime")?)?;
        let wanted: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();

        let mut pids: Vec<u32> = self
            .fs
            .read_dir(Path::new(&self.proc_path))?
            .iter()
            .filter_map(|entry| entry.file_name()?.to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();

        let mut processes = Vec::new();
        for pid in pids {
            let Some(usage) = self.process_usage(pid, uptime) else {
                trace!("process {} disappeared during enumeration", pid);
                continue;
            };
            if wanted.contains(&usage.name.to_lowercase()) {
                processes.push(usage);
            }
        }
        Ok(processes)
    }
}
