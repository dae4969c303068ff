//! Telemetry: metrics and span tracing
//!
//! Three metric flavors keyed by name plus a tag set: monotonic
//! counters, append-only histograms with sorted-sample percentile
//! snapshots, and last-writer-wins gauges. Spans wrap operations and
//! propagate trace identity as three text fields. A disabled registry
//! hands out no-op spans so instrumented call sites keep their shape.
//!
//! Stable tag keys: `agent.name`, `provider.name`, `tool.name`,
//! `success`, `error_type`. Span names follow `agent.request` and
//! `llm.call`.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Name plus normalized (sorted) tag set identifying one metric series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MetricKey {
    name: String,
    tags: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: &str, tags: &[(&str, &str)]) -> Self {
        let mut tags: Vec<(String, String)> = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        tags.sort();
        Self {
            name: name.to_string(),
            tags,
        }
    }
}

/// Histogram snapshot with sorted-sample percentile estimates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistogramSnapshot {
    pub count: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Metrics registry and span factory.
#[derive(Debug)]
pub struct Telemetry {
    enabled: bool,
    counters: DashMap<MetricKey, AtomicU64>,
    histograms: DashMap<MetricKey, Mutex<Vec<f64>>>,
    gauges: DashMap<MetricKey, Mutex<f64>>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            enabled: true,
            counters: DashMap::new(),
            histograms: DashMap::new(),
            gauges: DashMap::new(),
        }
    }

    /// Registry that records nothing and hands out no-op spans.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            counters: DashMap::new(),
            histograms: DashMap::new(),
            gauges: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Add to a monotonic counter.
    pub fn counter_add(&self, name: &str, tags: &[(&str, &str)], delta: u64) {
        if !self.enabled {
            return;
        }
        self.counters
            .entry(MetricKey::new(name, tags))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    pub fn counter_value(&self, name: &str, tags: &[(&str, &str)]) -> u64 {
        self.counters
            .get(&MetricKey::new(name, tags))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Append one observation to a histogram series.
    pub fn histogram_record(&self, name: &str, tags: &[(&str, &str)], value: f64) {
        if !self.enabled {
            return;
        }
        self.histograms
            .entry(MetricKey::new(name, tags))
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .unwrap()
            .push(value);
    }

    pub fn histogram_snapshot(
        &self,
        name: &str,
        tags: &[(&str, &str)],
    ) -> Option<HistogramSnapshot> {
        let entry = self.histograms.get(&MetricKey::new(name, tags))?;
        let samples = entry.lock().unwrap();
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.clone();
        drop(samples);
        sorted.sort_by(|a, b| a.total_cmp(b));
        let count = sorted.len();
        Some(HistogramSnapshot {
            count,
            sum: sorted.iter().sum(),
            min: sorted[0],
            max: sorted[count - 1],
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        })
    }

    /// Set a gauge; last writer wins.
    pub fn gauge_set(&self, name: &str, tags: &[(&str, &str)], value: f64) {
        if !self.enabled {
            return;
        }
        *self
            .gauges
            .entry(MetricKey::new(name, tags))
            .or_insert_with(|| Mutex::new(0.0))
            .lock()
            .unwrap() = value;
    }

    pub fn gauge_value(&self, name: &str, tags: &[(&str, &str)]) -> Option<f64> {
        self.gauges
            .get(&MetricKey::new(name, tags))
            .map(|g| *g.lock().unwrap())
    }

    /// Start a root span. Disabled registries return a no-op span with
    /// the same shape.
    pub fn start_span(&self, name: &str, kind: SpanKind) -> Span {
        if !self.enabled {
            return Span::noop();
        }
        Span::root(name, kind)
    }

    /// Start a span continuing the trace described by `parent`.
    pub fn start_child_span(&self, name: &str, kind: SpanKind, parent: &SpanContext) -> Span {
        if !self.enabled {
            return Span::noop();
        }
        Span {
            trace_id: parent.trace_id.clone(),
            span_id: new_id(),
            parent_span_id: Some(parent.span_id.clone()),
            name: name.to_string(),
            kind,
            attributes: HashMap::new(),
            events: Vec::new(),
            status: SpanStatus::Unset,
            started: Some(Instant::now()),
            enabled: true,
        }
    }
}

/// Sorted-sample percentile at quantile `q` (nearest-rank).
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = ((q * sorted.len() as f64).ceil() as usize).max(1) - 1;
    sorted[rank.min(sorted.len() - 1)]
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Span kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SpanKind {
    Internal,
    Client,
    Server,
}

/// Span status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

/// Timestamped annotation inside a span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Trace identity propagated across boundaries as three text fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: String,
    pub span_id: String,
    pub flags: String,
}

impl SpanContext {
    /// Encode as `(trace_id, span_id, flags)` text fields.
    pub fn to_fields(&self) -> (String, String, String) {
        (
            self.trace_id.clone(),
            self.span_id.clone(),
            self.flags.clone(),
        )
    }

    pub fn from_fields(trace_id: &str, span_id: &str, flags: &str) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            flags: flags.to_string(),
        }
    }
}

/// A timed, attributed record of one operation.
#[derive(Debug)]
pub struct Span {
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    name: String,
    kind: SpanKind,
    attributes: HashMap<String, String>,
    events: Vec<SpanEvent>,
    status: SpanStatus,
    started: Option<Instant>,
    enabled: bool,
}

impl Span {
    fn root(name: &str, kind: SpanKind) -> Self {
        Self {
            trace_id: new_id(),
            span_id: new_id(),
            parent_span_id: None,
            name: name.to_string(),
            kind,
            attributes: HashMap::new(),
            events: Vec::new(),
            status: SpanStatus::Unset,
            started: Some(Instant::now()),
            enabled: true,
        }
    }

    fn noop() -> Self {
        Self {
            trace_id: String::new(),
            span_id: String::new(),
            parent_span_id: None,
            name: String::new(),
            kind: SpanKind::Internal,
            attributes: HashMap::new(),
            events: Vec::new(),
            status: SpanStatus::Unset,
            started: None,
            enabled: false,
        }
    }

    pub fn is_noop(&self) -> bool {
        !self.enabled
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SpanKind {
        self.kind
    }

    pub fn status(&self) -> SpanStatus {
        self.status
    }

    pub fn parent_span_id(&self) -> Option<&str> {
        self.parent_span_id.as_deref()
    }

    pub fn set_attribute(&mut self, key: &str, value: &str) {
        if !self.enabled {
            return;
        }
        self.attributes.insert(key.to_string(), value.to_string());
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn add_event(&mut self, name: &str) {
        if !self.enabled {
            return;
        }
        self.events.push(SpanEvent {
            name: name.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        if !self.enabled {
            return;
        }
        self.status = status;
    }

    /// Propagatable identity of this span.
    pub fn context(&self) -> SpanContext {
        SpanContext {
            trace_id: self.trace_id.clone(),
            span_id: self.span_id.clone(),
            flags: if self.enabled { "01" } else { "00" }.to_string(),
        }
    }

    /// Finish the span, logging its duration.
    pub fn end(self) {
        if !self.enabled {
            return;
        }
        let elapsed_ms = self
            .started
            .map(|s| s.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        debug!(
            span = %self.name,
            trace_id = %self.trace_id,
            status = ?self.status,
            elapsed_ms = elapsed_ms,
            "span ended"
        );
    }
}
