use std::collections::BTreeMap;
use std::io::Write;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::AggregatePoint;

/// Downstream sink for aggregated points.
///
/// Implementations own their retry policy; failures are logged, never
/// returned to the aggregator.
pub trait MetricExporter {
    fn submit(&mut self, point: &AggregatePoint);
    fn flush(&mut self);
}

/// Writes each aggregated point to the log.
#[derive(Debug, Default)]
pub struct LogExporter;

impl MetricExporter for LogExporter {
    fn submit(&mut self, point: &AggregatePoint) {
        info!(
            name = %point.name,
            labels = ?point.labels,
            count = point.count(),
            mean = point.mean(),
            min = point.min(),
            max = point.max(),
            "aggregated metric"
        );
    }

    fn flush(&mut self) {}
}

#[derive(Serialize)]
struct Envelope<'a> {
    name: &'static str,
    time: String,
    #[serde(rename = "iKey")]
    ikey: &'a str,
    tags: BTreeMap<&'static str, &'a str>,
    data: Data<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Data<'a> {
    base_type: &'static str,
    base_data: MetricData<'a>,
}

#[derive(Serialize)]
struct MetricData<'a> {
    ver: u32,
    metrics: [DataPoint<'a>; 1],
    properties: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DataPoint<'a> {
    name: &'a str,
    kind: &'static str,
    value: f64,
    count: usize,
    min: f64,
    max: f64,
    std_dev: f64,
}

/// Writes one telemetry envelope per point as a JSON line.
///
/// Envelopes carry the instrumentation key and tag the pool as cloud role
/// and the node as role instance.
pub struct JsonLinesExporter<W: Write> {
    writer: W,
    instrumentation_key: String,
    pool_id: String,
    node_id: String,
}

impl<W: Write> JsonLinesExporter<W> {
    pub fn new(
        writer: W,
        instrumentation_key: impl Into<String>,
        pool_id: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            writer,
            instrumentation_key: instrumentation_key.into(),
            pool_id: pool_id.into(),
            node_id: node_id.into(),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    fn envelope<'a>(&'a self, point: &'a AggregatePoint) -> Envelope<'a> {
        let mut tags = BTreeMap::new();
        tags.insert("ai.cloud.role", self.pool_id.as_str());
        tags.insert("ai.cloud.roleInstance", self.node_id.as_str());

        Envelope {
            name: "Microsoft.ApplicationInsights.Metric",
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            ikey: &self.instrumentation_key,
            tags,
            data: Data {
                base_type: "MetricData",
                base_data: MetricData {
                    ver: 2,
                    metrics: [DataPoint {
                        name: &point.name,
                        kind: "Aggregation",
                        value: point.sum(),
                        count: point.count(),
                        min: point.min(),
                        max: point.max(),
                        std_dev: point.std_dev(),
                    }],
                    properties: &point.labels,
                },
            },
        }
    }
}

impl<W: Write> MetricExporter for JsonLinesExporter<W> {
    fn submit(&mut self, point: &AggregatePoint) {
        let line = match serde_json::to_string(&self.envelope(point)) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode metric {}: {}", point.name, e);
                return;
            }
        };
        if let Err(e) = writeln!(self.writer, "{}", line) {
            warn!("Failed to export metric {}: {}", point.name, e);
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!("Failed to flush metric export: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn point() -> AggregatePoint {
        let mut labels = BTreeMap::new();
        labels.insert("CPU #".to_string(), "0".to_string());
        AggregatePoint {
            name: "Cpu usage".to_string(),
            labels,
            values: vec![10.0, 30.0],
            window_start: Instant::now(),
        }
    }

    #[test]
    fn json_lines_envelope() {
        let mut exporter = JsonLinesExporter::new(Vec::new(), "ikey-1", "pool-a", "node-7");
        exporter.submit(&point());
        exporter.submit(&point());
        exporter.flush();

        let output = String::from_utf8(exporter.get_ref().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let json: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(json["iKey"], "ikey-1");
        assert_eq!(json["tags"]["ai.cloud.role"], "pool-a");
        assert_eq!(json["tags"]["ai.cloud.roleInstance"], "node-7");
        assert_eq!(json["data"]["baseType"], "MetricData");

        let metric = &json["data"]["baseData"]["metrics"][0];
        assert_eq!(metric["name"], "Cpu usage");
        assert_eq!(metric["value"], 40.0);
        assert_eq!(metric["count"], 2);
        assert_eq!(metric["min"], 10.0);
        assert_eq!(metric["max"], 30.0);
        assert_eq!(metric["stdDev"], 10.0);
        assert_eq!(json["data"]["baseData"]["properties"]["CPU #"], "0");
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("pipe closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::other("pipe closed"))
        }
    }

    #[test]
    fn write_failures_are_dropped() {
        let mut exporter = JsonLinesExporter::new(BrokenWriter, "k", "p", "n");
        exporter.submit(&point());
        exporter.flush();
    }

    #[test]
    fn log_exporter_accepts_points() {
        let mut exporter = LogExporter;
        exporter.submit(&point());
        exporter.flush();
    }
}
