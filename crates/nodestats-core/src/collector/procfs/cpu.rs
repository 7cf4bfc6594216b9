//! Per-core CPU utilisation from successive `/proc/stat` samples.

use std::collections::BTreeMap;

use crate::collector::procfs::parser::CpuStat;

/// Tick counters remembered for one core between samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CoreTimes {
    busy: u64,
    total: u64,
}

/// Turns cumulative per-core tick counters into busy percentages.
///
/// Owns the previous sample of every core it has seen. The first sample of a
/// core is measured against a zero baseline, i.e. it reports the average
/// utilisation since boot.
#[derive(Debug, Default)]
pub struct CpuSampler {
    cores: BTreeMap<u32, CoreTimes>,
}

impl CpuSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `stats` and returns one percentage per core, ordered by core id.
    ///
    /// The aggregate `cpu` line is ignored. Cores that disappeared since the
    /// previous sample are forgotten.
    pub fn sample(&mut self, stats: &[CpuStat]) -> Vec<f64> {
        let mut next = BTreeMap::new();

        for stat in stats {
            let Some(id) = stat.cpu_id else {
                continue;
            };
            next.insert(
                id,
                CoreTimes {
                    busy: stat.busy(),
                    total: stat.total(),
                },
            );
        }

        let percents = next
            .iter()
            .map(|(id, current)| {
                let previous = self.cores.get(id).copied().unwrap_or_default();
                core_percent(previous, *current)
            })
            .collect();

        self.cores = next;
        percents
    }

    /// Number of cores with a remembered sample.
    pub fn tracked_cores(&self) -> usize {
        self.cores.len()
    }
}

fn core_percent(previous: CoreTimes, current: CoreTimes) -> f64 {
    // A counter going backwards (hotplug, reset) restarts from zero.
    let previous = if current.total < previous.total || current.busy < previous.busy {
        CoreTimes::default()
    } else {
        previous
    };

    let total = current.total - previous.total;
    if total == 0 {
        return 0.0;
    }
    let busy = current.busy - previous.busy;
    (busy as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}
