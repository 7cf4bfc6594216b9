//! Snapshot consumers.
//!
//! The scheduler hands every [`NodeStatsSnapshot`] to one [`Reporter`].
//! [`ConsoleReporter`] prints a human-readable block or a JSON line per tick;
//! [`AggregatingReporter`] turns each reading into a named metric and batches
//! them through a [`MetricAggregator`](crate::aggregate::MetricAggregator).

mod aggregating;
mod console;

use crate::snapshot::NodeStatsSnapshot;

pub use aggregating::AggregatingReporter;
pub use console::{ConsoleFormat, ConsoleReporter};

/// Receives one snapshot per tick.
pub trait Reporter {
    fn report(&mut self, snapshot: &NodeStatsSnapshot);

    /// Called once when the scheduler stops. Buffered output must be
    /// delivered here.
    fn shutdown(&mut self);
}

impl<R: Reporter + ?Sized> Reporter for Box<R> {
    fn report(&mut self, snapshot: &NodeStatsSnapshot) {
        (**self).report(snapshot)
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}
