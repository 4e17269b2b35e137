//! Metric samples emitted by the client.
//!
//! Samples mirror the k6 WebSocket metrics (`ws_sessions`, `ws_connecting`,
//! `ws_msgs_sent`, `ws_msgs_received`) plus cable-specific trends.

pub mod metrics;

pub use metrics::{MetricKind, MetricSink, MetricsRecorder, NoopSink, Sample, Tags};
