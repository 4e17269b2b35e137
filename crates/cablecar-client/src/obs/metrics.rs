//! Metric samples and an in-memory recorder.
//!
//! The connection engine pushes k6-style samples (`name`, `tags`, `value`,
//! `time`) into a [`MetricSink`]. [`MetricsRecorder`] aggregates them into
//! counters and millisecond trends backed by `DashMap`; labels are flattened
//! into sorted key vectors to keep deterministic ordering.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;

pub const WS_SESSIONS: &str = "ws_sessions";
pub const WS_CONNECTING: &str = "ws_connecting";
pub const WS_MSGS_SENT: &str = "ws_msgs_sent";
pub const WS_MSGS_RECEIVED: &str = "ws_msgs_received";
pub const CABLE_SUBSCRIBE_DURATION: &str = "cable_subscribe_duration";

/// Sample tags shared by every sample of one connection.
pub type Tags = Arc<BTreeMap<String, String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonic count.
    Counter,
    /// Duration-like value in milliseconds.
    Trend,
}

#[derive(Debug, Clone)]
pub struct Sample {
    pub name: &'static str,
    pub kind: MetricKind,
    pub tags: Tags,
    pub value: f64,
    pub time: SystemTime,
}

impl Sample {
    pub fn counter(name: &'static str, tags: Tags, value: f64) -> Self {
        Self { name, kind: MetricKind::Counter, tags, value, time: SystemTime::now() }
    }

    pub fn trend(name: &'static str, tags: Tags, millis: f64) -> Self {
        Self { name, kind: MetricKind::Trend, tags, value: millis, time: SystemTime::now() }
    }
}

/// Destination for samples (the host's output pipeline).
pub trait MetricSink: Send + Sync {
    fn push(&self, sample: Sample);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricSink for NoopSink {
    fn push(&self, _sample: Sample) {}
}

/// Helper to escape label values.
fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn label_key(name: &str, tags: &BTreeMap<String, String>) -> (String, Vec<(String, String)>) {
    // BTreeMap iteration is already sorted.
    let labels = tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    (name.to_owned(), labels)
}

fn label_str(labels: &[(String, String)]) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect::<Vec<_>>()
        .join(",")
}

type SeriesKey = (String, Vec<(String, String)>);

#[derive(Default)]
struct Trend {
    count: AtomicU64,
    /// Sum in microseconds, so it fits an atomic integer.
    sum_micros: AtomicU64,
    max_micros: AtomicU64,
}

/// In-memory aggregation of pushed samples.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: DashMap<SeriesKey, AtomicU64>,
    trends: DashMap<SeriesKey, Trend>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total of a counter across all label sets.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .iter()
            .filter(|r| r.key().0 == name)
            .map(|r| r.value().load(Ordering::Relaxed))
            .sum()
    }

    /// Number of observations of a trend across all label sets.
    pub fn trend_count(&self, name: &str) -> u64 {
        self.trends
            .iter()
            .filter(|r| r.key().0 == name)
            .map(|r| r.value().count.load(Ordering::Relaxed))
            .sum()
    }

    /// Render in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for r in self.counters.iter() {
            let (name, labels) = r.key();
            let _ = writeln!(out, "# TYPE {name}_total counter");
            let _ = writeln!(
                out,
                "{name}_total{{{}}} {}",
                label_str(labels),
                r.value().load(Ordering::Relaxed)
            );
        }
        for r in self.trends.iter() {
            let (name, labels) = r.key();
            let t = r.value();
            let labels = label_str(labels);
            let _ = writeln!(out, "# TYPE {name}_micros summary");
            let _ = writeln!(out, "{name}_micros_sum{{{labels}}} {}", t.sum_micros.load(Ordering::Relaxed));
            let _ = writeln!(out, "{name}_micros_count{{{labels}}} {}", t.count.load(Ordering::Relaxed));
            let _ = writeln!(out, "{name}_micros_max{{{labels}}} {}", t.max_micros.load(Ordering::Relaxed));
        }
        out
    }
}

impl MetricSink for MetricsRecorder {
    fn push(&self, sample: Sample) {
        let key = label_key(sample.name, &sample.tags);
        match sample.kind {
            MetricKind::Counter => {
                let counter = self.counters.entry(key).or_insert_with(|| AtomicU64::new(0));
                counter.fetch_add(sample.value.max(0.0) as u64, Ordering::Relaxed);
            }
            MetricKind::Trend => {
                let micros = (sample.value.max(0.0) * 1000.0) as u64;
                let trend = self.trends.entry(key).or_default();
                trend.count.fetch_add(1, Ordering::Relaxed);
                trend.sum_micros.fetch_add(micros, Ordering::Relaxed);
                trend.max_micros.fetch_max(micros, Ordering::Relaxed);
            }
        }
    }
}
