//! Chain → probe-kind registrations and the factory that turns them into
//! concrete probes for one provider.
//!
//! A [`Registry`] is a plain value built fresh for every invocation and
//! passed by reference; nothing accumulates across invocations.

use std::collections::HashMap;
use std::sync::Arc;

use solana_keypair::Keypair;

use crate::error::{Error, Result};
use crate::landing::{LandingProbe, LandingSettings};
use crate::probe::{EndpointConfig, Probe, ProbeContext, RpcMethod, RpcProbe};
use crate::ws_probe::{Subscription, WsProbe};

/// Provider-label suffix for probes bound to the alternate transaction endpoint.
pub const TX_PROVIDER_SUFFIX: &str = "_tx";

#[derive(Clone)]
pub enum ProbeKind {
    Rpc(Arc<dyn RpcMethod>),
    Subscription(Arc<dyn Subscription>),
    /// Built once per endpoint: primary, and the `tx_endpoint` when present.
    TxLanding { keypair: Arc<Keypair>, settings: LandingSettings },
}

impl ProbeKind {
    pub fn rpc(method: impl RpcMethod + 'static) -> Self {
        ProbeKind::Rpc(Arc::new(method))
    }

    pub fn subscription(sub: impl Subscription + 'static) -> Self {
        ProbeKind::Subscription(Arc::new(sub))
    }

    pub fn label(&self) -> &str {
        match self {
            ProbeKind::Rpc(m) => m.name(),
            ProbeKind::Subscription(s) => s.method(),
            ProbeKind::TxLanding { .. } => "sendTransaction",
        }
    }
}

#[derive(Clone)]
pub struct Registration {
    pub kind: ProbeKind,
    pub metric_name: String,
}

/// A probe that could not be built, and why.
#[derive(Debug)]
pub struct Skipped {
    pub method: String,
    pub provider: String,
    pub error: Error,
}

#[derive(Default)]
pub struct Registry {
    chains: HashMap<String, Vec<Registration>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append registrations for `chain`. An empty list still marks the chain
    /// as known, so a region-gated chain yields no probes instead of an error.
    pub fn register(&mut self, chain: &str, probes: Vec<(ProbeKind, String)>) {
        let entry = self.chains.entry(chain.to_lowercase()).or_default();
        entry.extend(probes.into_iter().map(|(kind, metric_name)| Registration { kind, metric_name }));
    }

    pub fn clear(&mut self) {
        self.chains.clear();
    }

    pub fn is_registered(&self, chain: &str) -> bool {
        self.chains.contains_key(&chain.to_lowercase())
    }

    pub fn registrations(&self, chain: &str) -> Result<&[Registration]> {
        self.chains.get(&chain.to_lowercase()).map(Vec::as_slice).ok_or_else(|| {
            let mut known: Vec<&str> = self.chains.keys().map(String::as_str).collect();
            known.sort_unstable();
            Error::Configuration(format!("no probes registered for '{chain}'; known: {known:?}"))
        })
    }

    /// Build one probe per registration for the provider in `ctx`. A probe
    /// whose construction fails is reported in the second list and never runs.
    pub fn create(&self, chain: &str, ctx: &ProbeContext) -> Result<(Vec<Box<dyn Probe>>, Vec<Skipped>)> {
        let mut probes: Vec<Box<dyn Probe>> = Vec::new();
        let mut skipped = Vec::new();

        for reg in self.registrations(chain)? {
            let mut built = vec![(ctx.provider.clone(), build(reg, ctx))];

            if let ProbeKind::TxLanding { .. } = reg.kind {
                if let Some(tx_endpoint) = ctx.endpoints.tx_endpoint.as_deref().filter(|e| !e.is_empty()) {
                    let tx_ctx = ProbeContext {
                        endpoints: Arc::new(EndpointConfig {
                            main_endpoint: tx_endpoint.to_string(),
                            ..ctx.endpoints.as_ref().clone()
                        }),
                        provider: format!("{}{}", ctx.provider, TX_PROVIDER_SUFFIX),
                        ..ctx.clone()
                    };
                    built.push((tx_ctx.provider.clone(), build(reg, &tx_ctx)));
                }
            }

            for (provider, result) in built {
                match result {
                    Ok(probe) => probes.push(probe),
                    Err(error) => {
                        tracing::warn!("skipping {} for {}: {}", reg.kind.label(), provider, error);
                        skipped.push(Skipped { method: reg.kind.label().to_string(), provider, error });
                    }
                }
            }
        }

        Ok((probes, skipped))
    }
}

fn build(reg: &Registration, ctx: &ProbeContext) -> Result<Box<dyn Probe>> {
    Ok(match &reg.kind {
        ProbeKind::Rpc(method) => Box::new(RpcProbe::new(&reg.metric_name, method.clone(), ctx)?),
        ProbeKind::Subscription(sub) => Box::new(WsProbe::new(&reg.metric_name, sub.clone(), ctx)?),
        ProbeKind::TxLanding { keypair, settings } => {
            Box::new(LandingProbe::new(&reg.metric_name, keypair.clone(), *settings, ctx)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelKey;
    use crate::methods::evm::{BlockNumber, NewHeads, TransactionReceipt};
    use crate::probe::ProbeSettings;
    use crate::state::ReferenceState;

    fn ctx(endpoints: EndpointConfig, state: ReferenceState) -> ProbeContext {
        ProbeContext {
            endpoints: Arc::new(endpoints),
            source_region: "fra1".into(),
            target_region: "eu-central".into(),
            chain: "Solana".into(),
            provider: "providerX".into(),
            state: Arc::new(state),
            settings: ProbeSettings::default(),
        }
    }

    #[test]
    fn test_tx_landing_built_per_endpoint() {
        let mut registry = Registry::new();
        registry.register(
            "solana",
            vec![(
                ProbeKind::TxLanding { keypair: Arc::new(Keypair::new()), settings: LandingSettings::default() },
                "transaction_landing_latency".to_string(),
            )],
        );

        let endpoints = EndpointConfig {
            main_endpoint: "http://main.example".into(),
            ws_endpoint: None,
            tx_endpoint: Some("http://tx.example".into()),
        };
        let (probes, skipped) = registry.create("Solana", &ctx(endpoints, ReferenceState::default())).unwrap();

        assert!(skipped.is_empty());
        assert_eq!(probes.len(), 2);
        let providers: Vec<_> = probes.iter().map(|p| p.metric().labels().get(LabelKey::Provider).unwrap()).collect();
        assert_eq!(providers, ["providerX", "providerX_tx"]);
        for p in &probes {
            let labels = p.metric().labels();
            assert_eq!(labels.get(LabelKey::SourceRegion), Some("fra1"));
            assert_eq!(labels.get(LabelKey::TargetRegion), Some("eu-central"));
            assert_eq!(labels.get(LabelKey::Blockchain), Some("Solana"));
        }
    }

    #[test]
    fn test_tx_landing_single_without_tx_endpoint() {
        let mut registry = Registry::new();
        registry.register(
            "solana",
            vec![(
                ProbeKind::TxLanding { keypair: Arc::new(Keypair::new()), settings: LandingSettings::default() },
                "m".to_string(),
            )],
        );
        let endpoints = EndpointConfig { main_endpoint: "http://main.example".into(), ..Default::default() };
        let (probes, _) = registry.create("solana", &ctx(endpoints, ReferenceState::default())).unwrap();
        assert_eq!(probes.len(), 1);
    }

    #[test]
    fn test_invalid_probes_skipped_individually() {
        let mut registry = Registry::new();
        registry.register(
            "ethereum",
            vec![
                (ProbeKind::rpc(BlockNumber), "m".to_string()),
                (ProbeKind::rpc(TransactionReceipt), "m".to_string()),
                (ProbeKind::subscription(NewHeads), "m".to_string()),
            ],
        );
        let endpoints = EndpointConfig { main_endpoint: "http://node.example".into(), ..Default::default() };
        let (probes, skipped) = registry.create("ethereum", &ctx(endpoints, ReferenceState::default())).unwrap();

        assert_eq!(probes.len(), 1);
        assert_eq!(skipped.len(), 2);
        assert_eq!(skipped[0].error.kind(), "ValidationError");
        assert_eq!(skipped[1].error.kind(), "ConfigurationError");
    }

    #[test]
    fn test_unknown_chain_and_clear() {
        let mut registry = Registry::new();
        registry.register("ton", vec![]);
        assert!(registry.is_registered("TON"));
        let endpoints = EndpointConfig::default();
        let err = registry.create("base", &ctx(endpoints, ReferenceState::default())).err().unwrap();
        assert_eq!(err.kind(), "ConfigurationError");

        registry.clear();
        assert!(!registry.is_registered("ton"));
    }
}
