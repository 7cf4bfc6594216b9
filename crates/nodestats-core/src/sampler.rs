//! One tick of node sampling.

use std::time::Instant;

use chrono::Utc;
use tracing::warn;

use crate::collector::{CollectError, SystemProbe};
use crate::gpu::GpuStatsCollector;
use crate::rates::RateAggregator;
use crate::snapshot::NodeStatsSnapshot;

/// Independently toggleable subsystems.
///
/// Process monitoring is not part of the set: it is active whenever the
/// sampler has a non-empty list of process names to watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsystemSet {
    pub disk_io: bool,
    pub disk_usage: bool,
    pub network_io: bool,
    pub cpu: bool,
    pub memory: bool,
    pub gpu: bool,
}

impl SubsystemSet {
    pub fn all() -> Self {
        Self {
            disk_io: true,
            disk_usage: true,
            network_io: true,
            cpu: true,
            memory: true,
            gpu: true,
        }
    }

    pub fn none() -> Self {
        Self {
            disk_io: false,
            disk_usage: false,
            network_io: false,
            cpu: false,
            memory: false,
            gpu: false,
        }
    }
}

impl Default for SubsystemSet {
    fn default() -> Self {
        Self::all()
    }
}

/// Queries every enabled subsystem and assembles a [`NodeStatsSnapshot`].
///
/// Owns the rate state for disk and network counters, so a single sampler
/// must serve the whole process lifetime.
pub struct Sampler<P: SystemProbe> {
    probe: P,
    subsystems: SubsystemSet,
    disk_paths: Vec<String>,
    process_names: Vec<String>,
    gpu: Option<GpuStatsCollector>,
    disk_rate: RateAggregator,
    net_rate: RateAggregator,
}

/// Logs a failed subsystem query and turns it into an absent field.
fn absorb<T>(subsystem: &str, result: Result<T, CollectError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to collect {}: {}", subsystem, e);
            None
        }
    }
}

impl<P: SystemProbe> Sampler<P> {
    pub fn new(probe: P, subsystems: SubsystemSet) -> Self {
        Self {
            probe,
            subsystems,
            disk_paths: Vec::new(),
            process_names: Vec::new(),
            gpu: None,
            disk_rate: RateAggregator::new(),
            net_rate: RateAggregator::new(),
        }
    }

    /// Mount points whose capacity is reported.
    pub fn with_disk_paths(mut self, paths: Vec<String>) -> Self {
        self.disk_paths = paths;
        self
    }

    /// Process names to monitor; an empty list disables process monitoring.
    pub fn with_processes(mut self, names: Vec<String>) -> Self {
        self.process_names = names;
        self
    }

    pub fn with_gpu(mut self, collector: GpuStatsCollector) -> Self {
        self.gpu = Some(collector);
        self
    }

    pub fn subsystems(&self) -> SubsystemSet {
        self.subsystems
    }

    pub fn tick(&mut self) -> NodeStatsSnapshot {
        self.tick_at(Instant::now())
    }

    /// Samples every enabled subsystem as of `now`.
    ///
    /// A failing subsystem leaves its field absent; the tick always completes.
    pub fn tick_at(&mut self, now: Instant) -> NodeStatsSnapshot {
        let mut snapshot = NodeStatsSnapshot::empty(Utc::now().timestamp(), now);
        let enabled = self.subsystems;

        if enabled.memory {
            snapshot.memory = absorb("memory", self.probe.memory());
        }
        if enabled.cpu {
            snapshot.cpu_percents = absorb("cpu", self.probe.cpu_percents());
        }
        if enabled.disk_usage {
            snapshot.disk_usage = absorb("disk usage", self.probe.disk_usage(&self.disk_paths));
        }
        if enabled.disk_io {
            snapshot.disk_io = absorb("disk io", self.probe.disk_counters())
                .map(|counters| self.disk_rate.update_counters(counters, now));
        }
        if enabled.network_io {
            snapshot.net_io = absorb("network io", self.probe.net_counters())
                .map(|counters| self.net_rate.update_counters(counters, now));
        }
        if enabled.gpu {
            snapshot.gpus = self.gpu.as_ref().map(GpuStatsCollector::poll);
        }
        if !self.process_names.is_empty() {
            snapshot.processes = absorb("processes", self.probe.processes(&self.process_names));
        }

        snapshot
    }

    /// Releases the GPU backend.
    pub fn shutdown(&mut self) {
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{MockFs, ProcfsProbe};
    use crate::gpu::{BackendError, UnavailableBackend};
    use crate::rates::{IoCounters, IoRate};
    use crate::snapshot::{DiskUsage, MemoryUsage, ProcessUsage};
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Probe replaying scripted disk counters; other queries fail.
    #[derive(Default)]
    struct ScriptedProbe {
        disk: VecDeque<IoCounters>,
    }

    impl SystemProbe for ScriptedProbe {
        fn memory(&mut self) -> Result<MemoryUsage, CollectError> {
            Err(CollectError::Unsupported("memory".to_string()))
        }

        fn cpu_percents(&mut self) -> Result<Vec<f64>, CollectError> {
            Err(CollectError::Parse("garbled".to_string()))
        }

        fn disk_usage(&mut self, _paths: &[String]) -> Result<Vec<DiskUsage>, CollectError> {
            Ok(Vec::new())
        }

        fn disk_counters(&mut self) -> Result<IoCounters, CollectError> {
            self.disk
                .pop_front()
                .ok_or_else(|| CollectError::Unsupported("diskstats".to_string()))
        }

        fn net_counters(&mut self) -> Result<IoCounters, CollectError> {
            Err(CollectError::Unsupported("net".to_string()))
        }

        fn processes(&mut self, _names: &[String]) -> Result<Vec<ProcessUsage>, CollectError> {
            panic!("processes must not be polled without names");
        }
    }

    fn disk_io_only() -> SubsystemSet {
        SubsystemSet {
            disk_io: true,
            ..SubsystemSet::none()
        }
    }

    #[test]
    fn disk_rate_across_two_ticks() {
        let probe = ScriptedProbe {
            disk: VecDeque::from(vec![
                IoCounters {
                    read: 1000,
                    write: 2000,
                },
                IoCounters {
                    read: 1500,
                    write: 2600,
                },
            ]),
        };
        let mut sampler = Sampler::new(probe, disk_io_only());
        let t0 = Instant::now();

        let first = sampler.tick_at(t0);
        assert_eq!(first.disk_io, Some(IoRate::default()));

        let second = sampler.tick_at(t0 + Duration::from_secs(1));
        assert_eq!(
            second.disk_io,
            Some(IoRate {
                read_bps: 500.0,
                write_bps: 600.0
            })
        );
    }

    #[test]
    fn failing_subsystems_leave_fields_absent() {
        let mut sampler = Sampler::new(ScriptedProbe::default(), SubsystemSet::all());
        let snapshot = sampler.tick();

        assert!(snapshot.memory.is_none());
        assert!(snapshot.cpu_percents.is_none());
        assert!(snapshot.disk_io.is_none());
        assert!(snapshot.net_io.is_none());
        assert_eq!(snapshot.disk_usage, Some(Vec::new()));
        assert!(snapshot.gpus.is_none());
        assert!(snapshot.processes.is_none());
    }

    #[test]
    fn disabled_subsystems_are_not_queried() {
        let mut sampler = Sampler::new(ScriptedProbe::default(), SubsystemSet::none());
        let snapshot = sampler.tick();
        assert_eq!(snapshot.describe(), "");
    }

    #[test]
    fn gpu_without_backend_is_empty_list() {
        let gpu = GpuStatsCollector::new(Box::new(UnavailableBackend::new(
            BackendError::LibraryNotFound,
        )));
        let subsystems = SubsystemSet {
            gpu: true,
            ..SubsystemSet::none()
        };
        let mut sampler = Sampler::new(ScriptedProbe::default(), subsystems).with_gpu(gpu);
        assert_eq!(sampler.tick().gpus, Some(Vec::new()));
        sampler.shutdown();
    }

    #[test]
    fn full_tick_over_mock_procfs() {
        let fs = MockFs::typical_node();
        let probe = ProcfsProbe::new(fs.clone(), "/proc");
        let mut sampler = Sampler::new(probe, SubsystemSet::all())
            .with_disk_paths(vec!["/".to_string(), "/mnt".to_string()])
            .with_processes(vec!["python".to_string()]);

        let t0 = Instant::now();
        let first = sampler.tick_at(t0);
        assert_eq!(first.cpu_percents.as_ref().map(Vec::len), Some(4));
        assert_eq!(first.disk_usage.as_ref().map(Vec::len), Some(2));
        assert_eq!(first.net_io, Some(IoRate::default()));
        assert_eq!(first.processes.as_ref().map(Vec::len), Some(2));

        fs.set_net_dev(&[("lo", 1000, 1000), ("eth0", 5002000, 3001000)]);
        fs.set_diskstats(&[("sda", 20002, 40004), ("nvme0n1", 100000, 60000)]);
        let second = sampler.tick_at(t0 + Duration::from_secs(2));

        assert_eq!(
            second.net_io,
            Some(IoRate {
                read_bps: 1000.0,
                write_bps: 500.0
            })
        );
        assert_eq!(
            second.disk_io,
            Some(IoRate {
                read_bps: 512.0,
                write_bps: 1024.0
            })
        );
    }
}
