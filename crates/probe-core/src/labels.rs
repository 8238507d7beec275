//! Ordered, uniquely-keyed label dimensions attached to every probe.

use std::fmt;

/// Closed set of label keys. Declaration order is the rendering order of a
/// seeded [`LabelSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelKey {
    SourceRegion,
    TargetRegion,
    Blockchain,
    Provider,
    ApiMethod,
    ResponseStatus,
}

impl LabelKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelKey::SourceRegion => "source_region",
            LabelKey::TargetRegion => "target_region",
            LabelKey::Blockchain => "blockchain",
            LabelKey::Provider => "provider",
            LabelKey::ApiMethod => "api_method",
            LabelKey::ResponseStatus => "response_status",
        }
    }
}

impl fmt::Display for LabelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILED: &str = "failed";

/// Labels are updated in place or appended, never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<(LabelKey, String)>,
}

impl LabelSet {
    /// Empty set; use [`LabelSet::add`] to append dimensions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Full six-key set with `api_method=default` and `response_status=pending`.
    pub fn seeded(source_region: &str, target_region: &str, blockchain: &str, provider: &str) -> Self {
        Self {
            labels: vec![
                (LabelKey::SourceRegion, source_region.to_string()),
                (LabelKey::TargetRegion, target_region.to_string()),
                (LabelKey::Blockchain, blockchain.to_string()),
                (LabelKey::Provider, provider.to_string()),
                (LabelKey::ApiMethod, "default".to_string()),
                (LabelKey::ResponseStatus, STATUS_PENDING.to_string()),
            ],
        }
    }

    /// Update an existing label. Missing keys are logged and ignored.
    pub fn update(&mut self, key: LabelKey, value: impl Into<String>) {
        match self.labels.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value.into(),
            None => tracing::warn!("label '{}' not found", key),
        }
    }

    /// Update the label if present, append it otherwise.
    pub fn add(&mut self, key: LabelKey, value: impl Into<String>) {
        let value = value.into();
        match self.labels.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.labels.push((key, value)),
        }
    }

    pub fn get(&self, key: LabelKey) -> Option<&str> {
        self.labels.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (LabelKey, &str)> {
        self.labels.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// `key="value",...`, the context string used in log lines.
    pub fn prometheus(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}
