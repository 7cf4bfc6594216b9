//! nodestats-core - node telemetry sampling library.
//!
//! Provides:
//! - `collector` - OS counter sources (`/proc` parsing, filesystem mocking)
//! - `rates` - cumulative counter to rate conversion
//! - `gpu` - GPU backends and the per-tick GPU collector
//! - `snapshot` - immutable per-tick readings
//! - `sampler` - one tick of sampling over the enabled subsystems
//! - `scheduler` - fixed-period tick loop
//! - `aggregate` - time-windowed metric batching and exporters
//! - `report` - snapshot consumers (console, aggregating uploader)
//! - `config` - user configuration layering and validation
//! - `fmt` - shared formatting helpers (bytes, rates, percentages)

pub mod aggregate;
pub mod collector;
pub mod config;
pub mod fmt;
pub mod gpu;
pub mod rates;
pub mod report;
pub mod sampler;
pub mod scheduler;
pub mod snapshot;
