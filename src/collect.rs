//! `chainprobe collect` / `chainprobe land`: one bounded batch of probes.
//!
//! Every invocation builds a fresh registry, reads the chain's reference
//! state, runs the collector and hands the lines to the push step.

use anyhow::{Context, Result};
use probe_core::catalog::{display_name, Catalog};
use probe_core::{
    keypair_from_base58, BlobStore, Collection, Collector, LandingSettings, ReferenceState, Registry, StateCache,
};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Environment, ProbeConfig};
use crate::push::MetricsPusher;

/// What one invocation probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// All read probes of one chain.
    Chain(String),
    /// The Solana transaction-landing probe.
    Landing,
}

impl Target {
    fn chain(&self) -> &str {
        match self {
            Target::Chain(chain) => chain,
            Target::Landing => "solana",
        }
    }
}

#[derive(Debug)]
pub struct Report {
    pub chain: String,
    pub collection: Collection,
    pub pushed: bool,
}

impl Report {
    /// Body returned to the trigger and printed by the CLI.
    pub fn summary(&self) -> String {
        format!("{} metrics collection completed\n\nMetrics:\n{}", display_name(&self.chain), self.collection.text())
    }

    /// One-line push outcome, kept out of the summary body.
    pub fn push_status(&self) -> String {
        let state = if self.pushed { "pushed" } else { "not pushed" };
        format!("{}: {} line(s) {}", self.chain, self.collection.lines.len(), state)
    }
}

fn catalog(config: &ProbeConfig, env: &Environment) -> Catalog {
    Catalog::new(config.metric_prefix(env), config.collector.region_gating)
}

/// Reference state for `chain`. Missing store credentials or a store that
/// stays unreachable both degrade to an empty state.
pub async fn reference_state(config: &ProbeConfig, env: &Environment, chain: &str) -> ReferenceState {
    let Some(blob) = config.blob_config(env) else {
        tracing::warn!("blob store credentials not set; probing {} without reference state", chain);
        return ReferenceState::default();
    };
    let read = async {
        let cache = StateCache::new(Arc::new(BlobStore::new(blob)?))
            .with_retry(config.store.retries, Duration::from_secs(config.store.retry_delay_secs));
        cache.get(chain).await
    };
    match read.await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("reference state for {} unavailable [{}]: {}", chain, e.kind(), e);
            ReferenceState::default()
        }
    }
}

/// Register, build and run every probe for `target`.
pub async fn collect(config: &ProbeConfig, env: &Environment, target: &Target) -> Result<Collection> {
    let catalog = catalog(config, env);
    let mut registry = Registry::new();
    let chain = target.chain().to_lowercase();

    let state = match target {
        Target::Chain(_) => {
            catalog.register(&mut registry, &chain, &env.region)?;
            if registry.registrations(&chain)?.is_empty() {
                return Ok(Collection::default());
            }
            reference_state(config, env, &chain).await
        }
        Target::Landing => {
            if !catalog.runs_landing_in(&env.region) {
                tracing::info!("transaction landing is not run from region {}", env.region);
                return Ok(Collection::default());
            }
            let encoded = env.solana_private_key.as_deref().context("SOLANA_PRIVATE_KEY is not set")?;
            let keypair = Arc::new(keypair_from_base58(encoded)?);
            catalog.register_landing(&mut registry, &env.region, keypair, LandingSettings::default());
            ReferenceState::default()
        }
    };

    let providers = env.endpoints.providers_for(&chain);
    let collector = Collector::new(&registry, env.region.clone(), config.probe_settings());
    let collection = collector.collect(&chain, &providers, env.endpoints.default_region(), state).await?;
    tracing::info!(
        "{}: {} line(s) from {} probe(s), {} failed, {} skipped",
        chain,
        collection.lines.len(),
        collection.probes,
        collection.failed,
        collection.skipped.len()
    );
    Ok(collection)
}

/// Push when credentials are configured; a failed push never fails the run.
pub async fn push(config: &ProbeConfig, env: &Environment, collection: &Collection) -> Result<bool> {
    let Some(credentials) = env.grafana.clone() else {
        tracing::warn!("metrics backend credentials not set; skipping push");
        return Ok(false);
    };
    Ok(MetricsPusher::new(credentials, &config.push)?.push(&collection.lines).await)
}

pub async fn run(config: &ProbeConfig, env: &Environment, target: Target) -> Result<Report> {
    let collection = collect(config, env, &target).await?;
    let pushed = push(config, env, &collection).await?;
    Ok(Report { chain: target.chain().to_string(), collection, pushed })
}
