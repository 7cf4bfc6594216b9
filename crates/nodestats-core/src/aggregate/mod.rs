//! Time-windowed metric batching.
//!
//! [`MetricAggregator`] buckets scalar observations by name and label set for
//! a fixed window, then hands each bucket to a [`MetricExporter`] as one
//! [`AggregatePoint`]. The window rolls over lazily: the first observation
//! that arrives after the window has expired flushes it and opens a new one.

mod exporter;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

pub use exporter::{JsonLinesExporter, LogExporter, MetricExporter};

/// Default aggregation window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Bucket identity: metric name plus the full label set.
///
/// Labels are held sorted by key, so two label maps with the same entries
/// always produce the same key. Displayed as `name/k1=v1,k2=v2` for logs only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    name: String,
    labels: BTreeMap<String, String>,
}

impl MetricKey {
    pub fn new(name: &str, labels: &HashMap<String, String>) -> Self {
        MetricKey {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/", self.name)?;
        for (i, (k, v)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

/// All values recorded for one key during one window.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatePoint {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub values: Vec<f64>,
    pub window_start: Instant,
}

impl AggregatePoint {
    pub fn count(&self) -> usize {
        self.values.len()
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn min(&self) -> f64 {
        self.values.iter().copied().reduce(f64::min).unwrap_or(0.0)
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().reduce(f64::max).unwrap_or(0.0)
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.sum() / self.values.len() as f64
    }

    /// Population standard deviation.
    pub fn std_dev(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self
            .values
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / self.values.len() as f64;
        variance.sqrt()
    }
}

struct Window {
    start: Instant,
    buckets: BTreeMap<MetricKey, AggregatePoint>,
}

/// Batches observations into fixed windows and exports one point per bucket.
///
/// Single-threaded accumulator: owned by the tick loop.
pub struct MetricAggregator<E: MetricExporter> {
    window_duration: Duration,
    window: Option<Window>,
    exporter: E,
}

impl<E: MetricExporter> MetricAggregator<E> {
    pub fn new(window_duration: Duration, exporter: E) -> Self {
        Self {
            window_duration,
            window: None,
            exporter,
        }
    }

    pub fn window_duration(&self) -> Duration {
        self.window_duration
    }

    pub fn exporter(&self) -> &E {
        &self.exporter
    }

    /// Records one observation at `now`.
    ///
    /// If the open window is older than the window duration it is flushed
    /// first, so the observation lands in a fresh window starting at `now`.
    pub fn track(&mut self, name: &str, value: f64, labels: &HashMap<String, String>, now: Instant) {
        let expired = self
            .window
            .as_ref()
            .is_some_and(|w| now.saturating_duration_since(w.start) > self.window_duration);
        if expired {
            self.flush();
        }

        let window = self.window.get_or_insert_with(|| Window {
            start: now,
            buckets: BTreeMap::new(),
        });
        let window_start = window.start;

        let key = MetricKey::new(name, labels);
        window
            .buckets
            .entry(key)
            .or_insert_with_key(|key| AggregatePoint {
                name: key.name().to_string(),
                labels: key.labels().clone(),
                values: Vec::new(),
                window_start,
            })
            .values
            .push(value);
    }

    /// Exports every bucket of the open window and closes it.
    ///
    /// Does nothing when no window is open.
    pub fn flush(&mut self) {
        let Some(window) = self.window.take() else {
            return;
        };

        debug!(buckets = window.buckets.len(), "flushing aggregation window");
        for point in window.buckets.values() {
            self.exporter.submit(point);
        }
        self.exporter.flush();
    }

    /// Number of buckets in the open window.
    pub fn pending_buckets(&self) -> usize {
        self.window.as_ref().map_or(0, |w| w.buckets.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingExporter {
        points: Vec<AggregatePoint>,
        flushes: usize,
    }

    impl MetricExporter for RecordingExporter {
        fn submit(&mut self, point: &AggregatePoint) {
            self.points.push(point.clone());
        }

        fn flush(&mut self) {
            self.flushes += 1;
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn key_is_order_independent() {
        let mut forward = HashMap::new();
        forward.insert("Process Name".to_string(), "python".to_string());
        forward.insert("PID".to_string(), "42".to_string());

        let mut backward = HashMap::new();
        backward.insert("PID".to_string(), "42".to_string());
        backward.insert("Process Name".to_string(), "python".to_string());

        assert_eq!(
            MetricKey::new("Process CPU", &forward),
            MetricKey::new("Process CPU", &backward)
        );
        assert_eq!(
            MetricKey::new("Process CPU", &forward).to_string(),
            "Process CPU/PID=42,Process Name=python"
        );
    }

    #[test]
    fn key_distinguishes_label_values_and_names() {
        let a = MetricKey::new("Cpu usage", &labels(&[("CPU #", "0")]));
        let b = MetricKey::new("Cpu usage", &labels(&[("CPU #", "1")]));
        let c = MetricKey::new("Gpu usage", &labels(&[("CPU #", "0")]));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(MetricKey::new("Memory used", &HashMap::new()).to_string(), "Memory used/");
    }

    #[test]
    fn separators_inside_labels_do_not_merge_keys() {
        let packed = labels(&[("a", "1,b=2")]);
        let split = labels(&[("a", "1"), ("b", "2")]);
        assert_ne!(MetricKey::new("m", &packed), MetricKey::new("m", &split));

        let t0 = Instant::now();
        let mut agg = MetricAggregator::new(DEFAULT_WINDOW, RecordingExporter::default());
        agg.track("m", 1.0, &packed, t0);
        agg.track("m", 2.0, &split, t0);
        assert_eq!(agg.pending_buckets(), 2);

        agg.flush();
        let points = &agg.exporter().points;
        assert_eq!(points.len(), 2);
        let packed_point = points.iter().find(|p| p.labels.len() == 1).unwrap();
        assert_eq!(packed_point.labels["a"], "1,b=2");
        assert_eq!(packed_point.values, vec![1.0]);
        let split_point = points.iter().find(|p| p.labels.len() == 2).unwrap();
        assert_eq!(split_point.values, vec![2.0]);
    }

    #[test]
    fn same_labels_share_a_bucket() {
        let t0 = Instant::now();
        let mut agg = MetricAggregator::new(DEFAULT_WINDOW, RecordingExporter::default());

        agg.track("Process CPU", 1.0, &labels(&[("PID", "1"), ("Process Name", "a")]), t0);
        agg.track("Process CPU", 2.0, &labels(&[("Process Name", "a"), ("PID", "1")]), t0);
        agg.track("Process CPU", 3.0, &labels(&[("Process Name", "a"), ("PID", "2")]), t0);
        assert_eq!(agg.pending_buckets(), 2);
    }

    #[test]
    fn window_rolls_over_after_duration() {
        let t0 = Instant::now();
        let core0 = labels(&[("core", "0")]);
        let mut agg = MetricAggregator::new(Duration::from_secs(60), RecordingExporter::default());

        agg.track("cpu", 1.0, &core0, t0);
        agg.track("cpu", 2.0, &core0, t0 + Duration::from_secs(10));
        agg.track("cpu", 3.0, &core0, t0 + Duration::from_secs(30));
        assert!(agg.exporter().points.is_empty());

        agg.track("cpu", 4.0, &core0, t0 + Duration::from_secs(61));
        let exporter = agg.exporter();
        assert_eq!(exporter.points.len(), 1);
        assert_eq!(exporter.points[0].values, vec![1.0, 2.0, 3.0]);
        assert_eq!(exporter.points[0].window_start, t0);
        assert_eq!(exporter.flushes, 1);

        agg.flush();
        let exporter = agg.exporter();
        assert_eq!(exporter.points.len(), 2);
        assert_eq!(exporter.points[1].values, vec![4.0]);
        assert_eq!(exporter.points[1].window_start, t0 + Duration::from_secs(61));
    }

    #[test]
    fn exactly_one_window_is_not_expired() {
        let t0 = Instant::now();
        let mut agg = MetricAggregator::new(Duration::from_secs(60), RecordingExporter::default());
        agg.track("cpu", 1.0, &HashMap::new(), t0);
        agg.track("cpu", 2.0, &HashMap::new(), t0 + Duration::from_secs(60));
        assert!(agg.exporter().points.is_empty());
        assert_eq!(agg.pending_buckets(), 1);
    }

    #[test]
    fn flush_is_idempotent() {
        let mut agg = MetricAggregator::new(DEFAULT_WINDOW, RecordingExporter::default());
        agg.flush();
        assert_eq!(agg.exporter().flushes, 0);

        agg.track("Memory used", 5.0, &HashMap::new(), Instant::now());
        agg.flush();
        agg.flush();
        assert_eq!(agg.exporter().points.len(), 1);
        assert_eq!(agg.exporter().flushes, 1);
        assert_eq!(agg.pending_buckets(), 0);
    }

    #[test]
    fn point_statistics() {
        let point = AggregatePoint {
            name: "x".to_string(),
            labels: BTreeMap::new(),
            values: vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0],
            window_start: Instant::now(),
        };
        assert_eq!(point.count(), 8);
        assert_eq!(point.sum(), 40.0);
        assert_eq!(point.min(), 2.0);
        assert_eq!(point.max(), 9.0);
        assert_eq!(point.mean(), 5.0);
        assert_eq!(point.std_dev(), 2.0);
    }

    #[test]
    fn empty_point_statistics_are_zero() {
        let point = AggregatePoint {
            name: "x".to_string(),
            labels: BTreeMap::new(),
            values: Vec::new(),
            window_start: Instant::now(),
        };
        assert_eq!(point.min(), 0.0);
        assert_eq!(point.mean(), 0.0);
        assert_eq!(point.std_dev(), 0.0);
    }
}
