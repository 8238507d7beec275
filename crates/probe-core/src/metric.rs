//! Per-probe value bag, outcome recording and line-protocol rendering.

use crate::error::Error;
use crate::labels::{LabelKey, LabelSet, STATUS_FAILED, STATUS_SUCCESS};

/// Default value-bag key for a single request latency.
pub const RESPONSE_TIME: &str = "response_time";

/// One numeric sample with optional per-value tag overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    pub value: f64,
    pub labels: Option<Vec<(String, String)>>,
}

/// What a probe owns: its metric name, its label set and its value bag.
///
/// The bag keeps insertion order so rendered lines are stable.
#[derive(Debug, Clone)]
pub struct ProbeMetric {
    name: String,
    labels: LabelSet,
    values: Vec<(String, MetricValue)>,
}

impl ProbeMetric {
    pub fn new(name: impl Into<String>, labels: LabelSet) -> Self {
        Self { name: name.into(), labels, values: Vec::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn labels_mut(&mut self) -> &mut LabelSet {
        &mut self.labels
    }

    pub fn values(&self) -> &[(String, MetricValue)] {
        &self.values
    }

    pub fn value(&self, value_type: &str) -> Option<f64> {
        self.values.iter().find(|(k, _)| k == value_type).map(|(_, v)| v.value)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Set a value; existing per-value labels survive when none are given.
    pub fn set_value(&mut self, value_type: &str, value: f64, labels: Option<Vec<(String, String)>>) {
        match self.values.iter_mut().find(|(k, _)| k == value_type) {
            Some((_, existing)) => {
                existing.value = value;
                if labels.is_some() {
                    existing.labels = labels;
                }
            }
            None => self.values.push((value_type.to_string(), MetricValue { value, labels })),
        }
    }

    pub fn mark_success(&mut self) {
        self.labels.update(LabelKey::ResponseStatus, STATUS_SUCCESS);
    }

    /// Flag the probe as failed and zero every recorded value, keys preserved.
    pub fn mark_failure(&mut self) {
        self.labels.update(LabelKey::ResponseStatus, STATUS_FAILED);
        for (_, v) in self.values.iter_mut() {
            v.value = 0.0;
        }
    }

    /// Log `err` with full label context and make sure at least one value exists.
    pub fn record_error(&mut self, err: &Error) {
        if self.values.is_empty() {
            self.set_value(RESPONSE_TIME, 0.0, None);
        }
        tracing::error!("metric error [{}] {}: {}", err.kind(), self.labels.prometheus(), err);
    }

    /// One line per value-bag entry:
    /// `name,tag=value,...,metric_type=<key> value=<number> <unix_nanos>`.
    pub fn line_protocol(&self, timestamp_ns: i64) -> Vec<String> {
        let base: Vec<(String, String)> = self
            .labels
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_string()))
            .collect();

        self.values
            .iter()
            .map(|(value_type, mv)| {
                let mut tags = base.clone();
                if let Some(overrides) = &mv.labels {
                    for (key, value) in overrides {
                        match tags.iter_mut().find(|(k, _)| k == key) {
                            Some((_, v)) => *v = value.clone(),
                            None => tags.push((key.clone(), value.clone())),
                        }
                    }
                }
                tags.push(("metric_type".to_string(), value_type.clone()));

                let mut line = escape(&self.name, false);
                for (k, v) in &tags {
                    line.push(',');
                    line.push_str(&escape(k, true));
                    line.push('=');
                    line.push_str(&escape(v, true));
                }
                line.push_str(&format!(" value={} {}", mv.value, timestamp_ns));
                line
            })
            .collect()
    }
}

/// Influx escaping: measurement names escape commas and spaces, tag keys and
/// values additionally escape `=`.
fn escape(s: &str, tag: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == ',' || c == ' ' || (tag && c == '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
