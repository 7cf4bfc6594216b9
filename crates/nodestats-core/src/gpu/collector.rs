use tracing::{info, warn};

use super::{GpuBackend, GpuUsage, backend_for_host, memory_percent};

/// Polls every GPU of the host once per tick.
///
/// Built once at startup. If the backend fails to initialise, the collector
/// reports no GPUs for its whole lifetime and never retries.
pub struct GpuStatsCollector {
    backend: Box<dyn GpuBackend>,
    device_count: u32,
    active: bool,
}

impl GpuStatsCollector {
    /// Initialises `backend` and counts its devices.
    pub fn new(mut backend: Box<dyn GpuBackend>) -> Self {
        if let Err(e) = backend.init() {
            info!("GPU monitoring unavailable: {}", e);
            return Self {
                backend,
                device_count: 0,
                active: false,
            };
        }

        let device_count = match backend.device_count() {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to count GPUs: {}", e);
                0
            }
        };
        info!("Found {} GPUs", device_count);

        Self {
            backend,
            device_count,
            active: true,
        }
    }

    /// Collector over the backend for this host.
    pub fn for_host() -> Self {
        Self::new(backend_for_host())
    }

    pub fn device_count(&self) -> u32 {
        self.device_count
    }

    /// Usage of each device, in index order.
    ///
    /// A device whose queries fail this tick is left out of the result; the
    /// others keep their own index.
    pub fn poll(&self) -> Vec<GpuUsage> {
        if !self.active {
            return Vec::new();
        }

        let mut usages = Vec::with_capacity(self.device_count as usize);
        for index in 0..self.device_count {
            let queried = self.backend.device_handle(index).and_then(|device| {
                let memory = self.backend.memory_info(device)?;
                let utilization = self.backend.utilization(device)?;
                Ok((memory, utilization))
            });

            match queried {
                Ok((memory, utilization)) => usages.push(GpuUsage {
                    index,
                    gpu_percent: f64::from(utilization.compute_percent),
                    memory_percent: memory_percent(memory.used, memory.total),
                }),
                Err(e) => warn!("Skipping GPU {}: {}", index, e),
            }
        }
        usages
    }

    /// Releases the backend. Later calls, and later polls, do nothing.
    pub fn shutdown(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = self.backend.shutdown() {
            warn!("GPU backend shutdown failed: {}", e);
        }
    }
}

impl Drop for GpuStatsCollector {
    fn drop(&mut self) {
        self.shutdown();
    }
}
