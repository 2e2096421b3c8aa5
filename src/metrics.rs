//! Metrics collection and reporting for worker execution.
//!
//! The counters themselves live in [`crate::stats`] and are always
//! maintained; this module is the reporting layer: register custom metrics
//! alongside the built-in ones, then print them or save them to a JSON
//! file after the job.
//!
//! # Example
//!
//! ```no_run
//! use irongraph::metrics::MetricsCollector;
//! use irongraph::stats::WorkerCounters;
//!
//! # fn main() -> anyhow::Result<()> {
//! let counters = WorkerCounters::new();
//! let mut metrics = MetricsCollector::new();
//! metrics.record_counters(&counters);
//! metrics.print();
//! metrics.save_to_file("worker_metrics.json")?;
//! # Ok(())
//! # }
//! ```

use crate::stats::{SuperstepStats, WorkerCounters};
use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::any::Any;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;

/// Trait for custom metrics.
pub trait Metric: Send + Sync + Any {
    /// The name of this metric (e.g. `messages_sent`).
    fn name(&self) -> &str;

    /// The current value of this metric as a JSON value.
    fn value(&self) -> Value;

    /// Optional description of what this metric measures.
    fn description(&self) -> Option<&str> {
        None
    }
}

/// A named counter with a fixed value.
pub struct CounterMetric {
    name: String,
    value: u64,
}

impl CounterMetric {
    pub fn with_value(name: impl Into<String>, value: u64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl Metric for CounterMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.value)
    }
}

/// Container for collecting worker execution metrics.
#[derive(Default)]
pub struct MetricsCollector {
    metrics: BTreeMap<String, Box<dyn Metric>>,
    supersteps: Vec<SuperstepStats>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom metric. A metric with the same name is replaced.
    pub fn register(&mut self, metric: Box<dyn Metric>) {
        self.metrics.insert(metric.name().to_string(), metric);
    }

    /// Register the built-in metrics derived from the worker counters.
    pub fn record_counters(&mut self, counters: &WorkerCounters) {
        let snapshot = counters.snapshot();
        for (name, value) in [
            ("messages_sent", snapshot.messages_sent),
            ("message_bytes_sent", snapshot.message_bytes_sent),
            ("local_messages_sent", snapshot.local_messages_sent),
            ("tokens_passed", snapshot.tokens_passed),
            ("forks_passed", snapshot.forks_passed),
            (
                "boundary_vertices_skipped",
                snapshot.boundary_vertices_skipped,
            ),
        ] {
            self.register(Box::new(CounterMetric::with_value(name, value)));
        }
    }

    /// Append one superstep's statistics to the timeline.
    pub fn record_superstep(&mut self, stats: SuperstepStats) {
        self.supersteps.push(stats);
    }

    /// Render everything as one JSON object.
    pub fn as_json(&self) -> Value {
        let metrics: serde_json::Map<String, Value> = self
            .metrics
            .values()
            .map(|m| (m.name().to_string(), m.value()))
            .collect();
        json!({
            "metrics": metrics,
            "supersteps": self.supersteps,
        })
    }

    /// Print metrics to stdout.
    pub fn print(&self) {
        println!("=== worker metrics ===");
        for metric in self.metrics.values() {
            match metric.description() {
                Some(desc) => println!("{}: {} ({desc})", metric.name(), metric.value()),
                None => println!("{}: {}", metric.name(), metric.value()),
            }
        }
        println!("supersteps recorded: {}", self.supersteps.len());
    }

    /// Save metrics to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let mut file = File::create(path.as_ref())
            .with_context(|| format!("failed to create {}", path.as_ref().display()))?;
        let body = serde_json::to_string_pretty(&self.as_json())?;
        file.write_all(body.as_bytes())?;
        Ok(())
    }
}
