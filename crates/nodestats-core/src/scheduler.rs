//! Fixed-period tick loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::collector::SystemProbe;
use crate::report::Reporter;
use crate::sampler::Sampler;

/// Default sampling period.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Granularity at which the loop re-checks the shutdown flag while waiting.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Drives a [`Sampler`] at a fixed period and feeds each snapshot to a
/// [`Reporter`].
///
/// Ticks never overlap: a tick that overruns the period delays the next one.
pub struct Scheduler<P: SystemProbe, R: Reporter> {
    sampler: Sampler<P>,
    reporter: R,
    interval: Duration,
}

impl<P: SystemProbe, R: Reporter> Scheduler<P, R> {
    pub fn new(sampler: Sampler<P>, reporter: R, interval: Duration) -> Self {
        Self {
            sampler,
            reporter,
            interval,
        }
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Runs one tick: sample, then report.
    pub fn tick(&mut self) {
        let snapshot = self.sampler.tick();
        debug!(timestamp = snapshot.timestamp, "collected {}", snapshot.describe());
        self.reporter.report(&snapshot);
    }

    /// Ticks until `running` is cleared, then shuts everything down.
    pub fn run(&mut self, running: &AtomicBool) {
        info!("Sampling every {:?}", self.interval);

        while running.load(Ordering::SeqCst) {
            let started = Instant::now();
            self.tick();

            let deadline = started + self.interval;
            loop {
                let now = Instant::now();
                if now >= deadline || !running.load(Ordering::SeqCst) {
                    break;
                }
                std::thread::sleep((deadline - now).min(SLEEP_SLICE));
            }
        }

        info!("Stopping sampler");
        self.shutdown();
    }

    /// Releases the GPU backend and delivers buffered metrics.
    pub fn shutdown(&mut self) {
        self.sampler.shutdown();
        self.reporter.shutdown();
    }
}
