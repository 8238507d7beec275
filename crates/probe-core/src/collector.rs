//! One collection invocation: build every provider's probes, run them all
//! concurrently, render whatever they recorded.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::labels::{LabelKey, STATUS_FAILED};
use crate::probe::{EndpointConfig, Probe, ProbeContext, ProbeSettings};
use crate::registry::{Registry, Skipped};
use crate::state::ReferenceState;

/// One provider entry of the endpoints document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub blockchain: String,
    pub name: String,
    #[serde(default)]
    pub http_endpoint: String,
    #[serde(default)]
    pub websocket_endpoint: Option<String>,
    #[serde(default)]
    pub tx_endpoint: Option<String>,
    /// Region the provider's node sits in; the document default applies when absent.
    #[serde(default)]
    pub region: Option<String>,
}

impl ProviderConfig {
    pub fn endpoints(&self) -> EndpointConfig {
        EndpointConfig {
            main_endpoint: self.http_endpoint.clone(),
            ws_endpoint: self.websocket_endpoint.clone(),
            tx_endpoint: self.tx_endpoint.clone(),
        }
    }
}

/// `{"providers": [...], "region": "..."}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointsDocument {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub region: Option<String>,
}

impl EndpointsDocument {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Configuration(format!("invalid endpoints document: {e}")))
    }

    pub fn providers_for(&self, chain: &str) -> Vec<ProviderConfig> {
        self.providers
            .iter()
            .filter(|p| p.blockchain.eq_ignore_ascii_case(chain))
            .cloned()
            .collect()
    }

    pub fn default_region(&self) -> &str {
        self.region.as_deref().unwrap_or("default")
    }
}

/// Outcome of one invocation.
#[derive(Debug, Default)]
pub struct Collection {
    pub lines: Vec<String>,
    pub probes: usize,
    pub failed: usize,
    pub skipped: Vec<Skipped>,
}

impl Collection {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

pub struct Collector<'a> {
    registry: &'a Registry,
    source_region: String,
    settings: ProbeSettings,
}

impl<'a> Collector<'a> {
    pub fn new(registry: &'a Registry, source_region: impl Into<String>, settings: ProbeSettings) -> Self {
        Self { registry, source_region: source_region.into(), settings }
    }

    /// Probes for every provider of `chain`, plus those that failed to build.
    pub fn build(
        &self,
        chain: &str,
        providers: &[ProviderConfig],
        default_target: &str,
        state: Arc<ReferenceState>,
    ) -> Result<(Vec<Box<dyn Probe>>, Vec<Skipped>)> {
        let mut probes = Vec::new();
        let mut skipped = Vec::new();
        for provider in providers {
            let ctx = ProbeContext {
                endpoints: Arc::new(provider.endpoints()),
                source_region: self.source_region.clone(),
                target_region: provider.region.clone().unwrap_or_else(|| default_target.to_string()),
                chain: chain.to_string(),
                provider: provider.name.clone(),
                state: state.clone(),
                settings: self.settings,
            };
            let (mut built, mut failed) = self.registry.create(chain, &ctx)?;
            probes.append(&mut built);
            skipped.append(&mut failed);
        }
        Ok((probes, skipped))
    }

    /// Run every probe of every provider concurrently. A chain registered
    /// with no probes (region-gated) yields an empty collection; a chain with
    /// probes but no providers is a configuration error.
    pub async fn collect(
        &self,
        chain: &str,
        providers: &[ProviderConfig],
        default_target: &str,
        state: ReferenceState,
    ) -> Result<Collection> {
        if self.registry.registrations(chain)?.is_empty() {
            tracing::info!("{}: no probes registered for region {}", chain, self.source_region);
            return Ok(Collection::default());
        }
        if providers.is_empty() {
            return Err(Error::Configuration(format!("no endpoints configured for {chain}")));
        }

        let (mut probes, skipped) = self.build(chain, providers, default_target, Arc::new(state))?;
        tracing::info!(
            "{}: running {} probe(s) across {} provider(s), {} skipped",
            chain,
            probes.len(),
            providers.len(),
            skipped.len()
        );

        run_all(&mut probes).await;

        let mut collection = render(&probes, now_ns());
        collection.skipped = skipped;
        Ok(collection)
    }
}

/// Concurrently collect every probe. Probes never fail outward, and a probe
/// that panics is recorded as failed without touching its siblings.
pub async fn run_all(probes: &mut [Box<dyn Probe>]) {
    let outcomes = join_all(probes.iter_mut().map(|p| AssertUnwindSafe(p.collect()).catch_unwind())).await;
    for (probe, outcome) in probes.iter_mut().zip(outcomes) {
        if let Err(panic) = outcome {
            let metric = probe.metric_mut();
            metric.mark_failure();
            metric.record_error(&Error::Aborted(panic_message(panic.as_ref())));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with non-string payload".into())
}

/// Line-protocol lines for every probe that recorded something, all at `timestamp_ns`.
pub fn render(probes: &[Box<dyn Probe>], timestamp_ns: i64) -> Collection {
    let mut collection = Collection { probes: probes.len(), ..Default::default() };
    for probe in probes {
        let metric = probe.metric();
        if metric.labels().get(LabelKey::ResponseStatus) == Some(STATUS_FAILED) {
            collection.failed += 1;
        }
        if metric.is_empty() {
            continue;
        }
        collection.lines.extend(metric.line_protocol(timestamp_ns));
    }
    collection
}

pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}
