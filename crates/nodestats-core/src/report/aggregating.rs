use std::collections::HashMap;
use std::time::Duration;

use super::Reporter;
use crate::aggregate::{MetricAggregator, MetricExporter};
use crate::snapshot::NodeStatsSnapshot;

/// Reports every reading as a named metric through a windowed aggregator.
///
/// The aggregator is flushed on [`Reporter::shutdown`] and again on drop, so
/// a partial window is never lost.
pub struct AggregatingReporter<E: MetricExporter> {
    aggregator: MetricAggregator<E>,
}

fn label(key: &str, value: impl ToString) -> HashMap<String, String> {
    let mut labels = HashMap::with_capacity(1);
    labels.insert(key.to_string(), value.to_string());
    labels
}

impl<E: MetricExporter> AggregatingReporter<E> {
    pub fn new(window: Duration, exporter: E) -> Self {
        Self {
            aggregator: MetricAggregator::new(window, exporter),
        }
    }

    pub fn aggregator(&self) -> &MetricAggregator<E> {
        &self.aggregator
    }
}

impl<E: MetricExporter> Reporter for AggregatingReporter<E> {
    fn report(&mut self, s: &NodeStatsSnapshot) {
        let now = s.taken_at;
        let agg = &mut self.aggregator;
        let none = HashMap::new();

        if let Some(cpus) = &s.cpu_percents {
            for (i, percent) in cpus.iter().enumerate() {
                agg.track("Cpu usage", *percent, &label("CPU #", i), now);
            }
        }

        if let Some(disks) = &s.disk_usage {
            for disk in disks {
                let labels = label("Disk", &disk.path);
                agg.track("Disk usage", disk.used as f64, &labels, now);
                agg.track("Disk free", disk.free as f64, &labels, now);
            }
        }

        if let Some(memory) = &s.memory {
            agg.track("Memory used", memory.used as f64, &none, now);
            agg.track("Memory available", memory.available as f64, &none, now);
        }

        if let Some(io) = &s.disk_io {
            agg.track("Disk read", io.read_bps, &none, now);
            agg.track("Disk write", io.write_bps, &none, now);
        }

        if let Some(io) = &s.net_io {
            agg.track("Network read", io.read_bps, &none, now);
            agg.track("Network write", io.write_bps, &none, now);
        }

        if let Some(gpus) = &s.gpus {
            for gpu in gpus {
                let labels = label("GPU #", gpu.index);
                agg.track("Gpu usage", gpu.gpu_percent, &labels, now);
                agg.track("Gpu memory usage", gpu.memory_percent, &labels, now);
            }
        }

        if let Some(processes) = &s.processes {
            for p in processes {
                let mut labels = label("Process Name", &p.name);
                labels.insert("PID".to_string(), p.pid.to_string());
                agg.track("Process CPU", p.cpu_percent, &labels, now);
                agg.track("Process Memory", p.memory_bytes as f64, &labels, now);
            }
        }
    }

    fn shutdown(&mut self) {
        self.aggregator.flush();
    }
}

impl<E: MetricExporter> Drop for AggregatingReporter<E> {
    fn drop(&mut self) {
        self.aggregator.flush();
    }
}
