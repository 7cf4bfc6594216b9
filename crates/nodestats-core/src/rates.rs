//! Counter-to-rate conversion for disk and network I/O.
//!
//! A [`RateAggregator`] keeps only the immediately preceding sample of a pair
//! of cumulative byte counters and turns each new sample into bytes/second.

use std::time::Instant;

use serde::Serialize;
use tracing::debug;

/// Cumulative read/write byte counters as reported by a counter source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoCounters {
    pub read: u64,
    pub write: u64,
}

/// Read/write throughput in bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IoRate {
    pub read_bps: f64,
    pub write_bps: f64,
}

/// Compute u64 delta, returning `None` on counter regression (reset or wraparound).
pub fn du64(curr: u64, prev: u64) -> Option<u64> {
    curr.checked_sub(prev)
}

#[derive(Debug, Clone, Copy)]
struct RateSample {
    timestamp: Instant,
    read: u64,
    write: u64,
}

/// Converts successive cumulative counter samples into rates.
///
/// One instance per counter source; it lives as long as the sampler.
#[derive(Debug, Default)]
pub struct RateAggregator {
    previous: Option<RateSample>,
}

impl RateAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new sample and returns the rate since the previous one.
    ///
    /// Returns zero rates for the first sample, when either counter went
    /// backwards, or when no time has elapsed since the previous sample.
    /// The new sample always replaces the previous one.
    pub fn update(&mut self, current_read: u64, current_write: u64, now: Instant) -> IoRate {
        let current = RateSample {
            timestamp: now,
            read: current_read,
            write: current_write,
        };
        let previous = self.previous.replace(current);

        let Some(previous) = previous else {
            return IoRate::default();
        };

        let elapsed = match now.checked_duration_since(previous.timestamp) {
            Some(d) if !d.is_zero() => d.as_secs_f64(),
            _ => {
                debug!("rate sample without elapsed time, reporting zero");
                return IoRate::default();
            }
        };

        match (
            du64(current_read, previous.read),
            du64(current_write, previous.write),
        ) {
            (Some(read), Some(write)) => IoRate {
                read_bps: read as f64 / elapsed,
                write_bps: write as f64 / elapsed,
            },
            _ => {
                debug!(
                    prev_read = previous.read,
                    prev_write = previous.write,
                    current_read,
                    current_write,
                    "counter regression, reporting zero rate"
                );
                IoRate::default()
            }
        }
    }

    /// Convenience wrapper over [`RateAggregator::update`] for a counter pair.
    pub fn update_counters(&mut self, counters: IoCounters, now: Instant) -> IoRate {
        self.update(counters.read, counters.write, now)
    }
}
