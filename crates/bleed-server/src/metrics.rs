use crate::routes::AppState;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

/// Sink for counter and timer updates outside the process.
///
/// Delivery is best effort. Names arrive already prefixed.
pub trait Reporter: Send + Sync {
    fn increment(&self, name: &str, delta: u64);
    fn decrement(&self, name: &str, delta: u64);
    fn timing(&self, name: &str, value: f64);
}

/// Forwards updates to the `metrics` facade, rendered by the Prometheus
/// exporter on the metrics port. Counters may go down, so they are gauges.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusReporter;

impl Reporter for PrometheusReporter {
    fn increment(&self, name: &str, delta: u64) {
        metrics::gauge!(name.to_string()).increment(delta as f64);
    }

    fn decrement(&self, name: &str, delta: u64) {
        metrics::gauge!(name.to_string()).decrement(delta as f64);
    }

    fn timing(&self, name: &str, value: f64) {
        metrics::histogram!(name.to_string()).record(value);
    }
}

struct MetricState {
    counters: HashMap<String, i64>,
    timers: HashMap<String, f64>,
    prefix: String,
}

impl MetricState {
    /// `prefix.` or nothing when the prefix is empty.
    fn key_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}.", self.prefix)
        }
    }
}

/// Process-wide counters and damped timers.
///
/// One lock guards both maps and the prefix, so a snapshot never observes a
/// half-applied update. The reporter is called after the lock is released.
pub struct Metrics {
    state: Mutex<MetricState>,
    reporter: Option<Arc<dyn Reporter>>,
    born: Instant,
}

impl Metrics {
    pub fn new(prefix: &str, reporter: Option<Arc<dyn Reporter>>) -> Self {
        Self {
            state: Mutex::new(MetricState {
                counters: HashMap::new(),
                timers: HashMap::new(),
                prefix: prefix.trim_end_matches('.').to_string(),
            }),
            reporter,
            born: Instant::now(),
        }
    }

    /// Change the prefix used by later snapshots and reports.
    pub fn set_prefix(&self, prefix: &str) {
        self.state.lock().prefix = prefix.trim_end_matches('.').to_string();
    }

    pub fn increment_by(&self, name: &str, delta: i64) {
        let (value, pfx) = {
            let mut state = self.state.lock();
            let counter = state.counters.entry(name.to_string()).or_insert(0);
            *counter += delta;
            let value = *counter;
            (value, state.key_prefix())
        };

        tracing::debug!(metric = name, value, "counter updated");

        if let Some(reporter) = &self.reporter {
            let full = format!("{pfx}{name}");
            if delta >= 0 {
                reporter.increment(&full, delta as u64);
            } else {
                reporter.decrement(&full, delta.unsigned_abs());
            }
        }
    }

    pub fn increment(&self, name: &str) {
        self.increment_by(name, 1);
    }

    pub fn decrement(&self, name: &str) {
        self.increment_by(name, -1);
    }

    /// Record a sample. The first sample sets the estimate; each later one
    /// moves it halfway towards the new value.
    pub fn timer(&self, name: &str, value: f64) {
        let (estimate, pfx) = {
            let mut state = self.state.lock();
            let estimate = match state.timers.entry(name.to_string()) {
                Entry::Occupied(mut entry) => {
                    let estimate = entry.get_mut();
                    *estimate += (value - *estimate) / 2.0;
                    *estimate
                }
                Entry::Vacant(entry) => *entry.insert(value),
            };
            (estimate, state.key_prefix())
        };

        tracing::debug!(metric = name, value, estimate, "timer updated");

        if let Some(reporter) = &self.reporter {
            reporter.timing(&format!("{pfx}{name}"), value);
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        let pfx = state.key_prefix();

        let mut values = BTreeMap::new();
        for (name, value) in &state.counters {
            values.insert(format!("{pfx}counter.{name}"), MetricValue::Counter(*value));
        }
        for (name, value) in &state.timers {
            values.insert(format!("{pfx}avg.{name}"), MetricValue::Average(*value));
        }
        values.insert(
            format!("{pfx}server.age"),
            MetricValue::Age(self.born.elapsed().as_secs()),
        );

        Snapshot(values)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Counter(i64),
    Average(f64),
    Age(u64),
}

/// Point-in-time copy of every metric, keyed by full name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Snapshot(BTreeMap<String, MetricValue>);

impl Snapshot {
    pub fn get(&self, key: &str) -> Option<MetricValue> {
        self.0.get(key).copied()
    }

    pub fn counter(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(MetricValue::Counter(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn average(&self, key: &str) -> Option<f64> {
        match self.0.get(key) {
            Some(MetricValue::Average(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// GET /metrics: JSON snapshot of the aggregator.
pub async fn snapshot_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = match serde_json::to_vec(&state.metrics.snapshot()) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "could not generate metrics report");
            br#"{"error":true}"#.to_vec()
        }
    };

    ([(header::CONTENT_TYPE, "application/json")], body)
}
