use std::sync::Mutex;

use tracing::info;

pub const DARK_FILES_FOUND: &str = "storage.consistency.actions_dark_files_found";
pub const DARK_FILES_CONFIRMED: &str = "storage.consistency.actions_dark_files_confirmed";
pub const DARK_FILES_DELETED: &str = "storage.consistency.actions_dark_files_deleted";
pub const DARK_FILES_DELETED_COUNTER: &str =
    "storage.consistency.actions_dark_files_deleted_counter";
pub const MISS_FILES_FOUND: &str = "storage.consistency.actions_miss_files_found";
pub const MISS_FILES_TO_RETRANSFER: &str = "storage.consistency.actions_miss_files_to_retransfer";
pub const MISS_FILES_TO_RETRANSFER_COUNTER: &str =
    "storage.consistency.actions_miss_files_to_retransfer_counter";

/// Receives gauges and counters, each labelled by endpoint.
///
/// Purely observational: nothing reads these back. All methods default to no-ops.
pub trait MetricsSink: Send + Sync {
    fn gauge(&self, _name: &str, _value: u64, _endpoint: &str) {}
    fn counter(&self, _name: &str, _delta: u64, _endpoint: &str) {}
}

/// Drops every sample.
pub struct SilentMetrics;

impl MetricsSink for SilentMetrics {}

/// Emits every sample as a `tracing` event on the `metrics` target.
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn gauge(&self, name: &str, value: u64, endpoint: &str) {
        info!(target: "metrics", kind = "gauge", name, value, endpoint);
    }

    fn counter(&self, name: &str, delta: u64, endpoint: &str) {
        info!(target: "metrics", kind = "counter", name, delta, endpoint);
    }
}

/// A sample kept by [`RecordingMetrics`].
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Gauge { name: String, value: u64, endpoint: String },
    Counter { name: String, delta: u64, endpoint: String },
}

/// Keeps every sample in memory, for inspection in tests and tools.
#[derive(Default)]
pub struct RecordingMetrics {
    samples: Mutex<Vec<Sample>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.samples
            .lock()
            .map(|samples| samples.clone())
            .unwrap_or_default()
    }

    /// Last value recorded for gauge `name`.
    pub fn last_gauge(&self, name: &str) -> Option<u64> {
        self.samples().into_iter().rev().find_map(|sample| match sample {
            Sample::Gauge { name: n, value, .. } if n == name => Some(value),
            _ => None,
        })
    }

    /// Sum of all deltas recorded for counter `name`.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.samples()
            .into_iter()
            .map(|sample| match sample {
                Sample::Counter { name: n, delta, .. } if n == name => delta,
                _ => 0,
            })
            .sum()
    }

    fn push(&self, sample: Sample) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.push(sample);
        }
    }
}

impl MetricsSink for RecordingMetrics {
    fn gauge(&self, name: &str, value: u64, endpoint: &str) {
        self.push(Sample::Gauge {
            name: name.to_string(),
            value,
            endpoint: endpoint.to_string(),
        });
    }

    fn counter(&self, name: &str, delta: u64, endpoint: &str) {
        self.push(Sample::Counter {
            name: name.to_string(),
            delta,
            endpoint: endpoint.to_string(),
        });
    }
}
