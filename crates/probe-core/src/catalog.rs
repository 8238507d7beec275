//! Which probes each chain runs, and from which regions.

use std::sync::Arc;

use solana_keypair::Keypair;

use crate::error::{Error, Result};
use crate::landing::LandingSettings;
use crate::methods::{evm, hyperliquid, solana, ton};
use crate::registry::{ProbeKind, Registry};

pub const RESPONSE_LATENCY: &str = "response_latency_seconds";
pub const LANDING_LATENCY: &str = "transaction_landing_latency";

pub const CHAINS: &[&str] = &["ethereum", "base", "arbitrum", "bnb", "monad", "hyperliquid", "solana", "ton"];

/// Regions the landing probe sends from.
pub const LANDING_REGIONS: &[&str] = &["fra1"];

const ERC20_TRANSFER: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Allowed source regions for `chain`; `None` means every region.
pub fn allowed_regions(chain: &str) -> Option<&'static [&'static str]> {
    match chain.to_lowercase().as_str() {
        "ethereum" | "solana" | "ton" | "monad" => Some(&["fra1", "sfo1", "sin1"]),
        "hyperliquid" => Some(&["fra1", "sfo1", "hnd1"]),
        _ => None,
    }
}

/// Human-facing chain name used in summaries.
pub fn display_name(chain: &str) -> String {
    match chain.to_lowercase().as_str() {
        "ethereum" => "Ethereum".into(),
        "solana" => "Solana".into(),
        "ton" => "TON".into(),
        "base" => "Base".into(),
        "arbitrum" => "Arbitrum".into(),
        "bnb" => "BNB".into(),
        "monad" => "Monad".into(),
        "hyperliquid" => "Hyperliquid".into(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    prefix: String,
    region_gating: bool,
}

impl Catalog {
    /// `prefix` is prepended to every metric name (`dev_` outside production).
    pub fn new(prefix: impl Into<String>, region_gating: bool) -> Self {
        Self { prefix: prefix.into(), region_gating }
    }

    pub fn metric_name(&self, base: &str) -> String {
        format!("{}{}", self.prefix, base)
    }

    pub fn runs_in(&self, chain: &str, region: &str) -> bool {
        !self.region_gating || allowed_regions(chain).map_or(true, |regions| regions.contains(&region))
    }

    pub fn runs_landing_in(&self, region: &str) -> bool {
        !self.region_gating || LANDING_REGIONS.contains(&region)
    }

    /// Register `chain` for an invocation in `region`. A gated-out chain is
    /// registered with no probes.
    pub fn register(&self, registry: &mut Registry, chain: &str, region: &str) -> Result<()> {
        let probes = probes_for(chain)
            .ok_or_else(|| Error::Configuration(format!("unsupported chain '{chain}'; known: {CHAINS:?}")))?;
        if !self.runs_in(chain, region) {
            tracing::info!("{} is not probed from region {}", chain, region);
            registry.register(chain, Vec::new());
            return Ok(());
        }
        let metric = self.metric_name(RESPONSE_LATENCY);
        registry.register(chain, probes.into_iter().map(|kind| (kind, metric.clone())).collect());
        Ok(())
    }

    /// Register the Solana landing probe alone under `solana`.
    pub fn register_landing(
        &self,
        registry: &mut Registry,
        region: &str,
        keypair: Arc<Keypair>,
        settings: LandingSettings,
    ) {
        if !self.runs_landing_in(region) {
            tracing::info!("transaction landing is not run from region {}", region);
            registry.register("solana", Vec::new());
            return;
        }
        registry.register(
            "solana",
            vec![(ProbeKind::TxLanding { keypair, settings }, self.metric_name(LANDING_LATENCY))],
        );
    }
}

// ---- per-chain probe lists ----

fn probes_for(chain: &str) -> Option<Vec<ProbeKind>> {
    let probes = match chain.to_lowercase().as_str() {
        "ethereum" => evm_probes(
            evm::EthCall {
                to: "0xc2edad668740f1aa35e4d8f227fb8e17dca888cd",
                data: "0x1526fe270000000000000000000000000000000000000000000000000000000000000001",
            },
            "0x690B9A9E9aa1C9dB991C7721a92d351Db4FaC990",
            Some("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
        ),
        "base" => evm_probes(
            evm::EthCall {
                to: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913",
                data: "0x70a082310000000000000000000000001985ea6e9c68e1c272d8209f3b478ac2fdb25c87",
            },
            "0xF977814e90dA44bFA03b6295A0616a897441aceC",
            Some("0x833589fcd6edb6e08f4c7c32d4f71b54bda02913"),
        ),
        "arbitrum" => evm_probes(
            evm::EthCall {
                to: "0xa97684ead0e402dC232d5A977953DF7ECBaB3CDb",
                data: "0x026b1d5f0000000000000000000000000000000000000000000000000000000000000000",
            },
            "0x794a61358D6845594F94dc1DB02A252b5b4814aD",
            None,
        ),
        "bnb" => evm_probes(
            evm::EthCall {
                to: "0xff75B6da14FfbbfD355Daf7a2731456b3562Ba6D",
                data: "0x026b1d5f0000000000000000000000000000000000000000000000000000000000000000",
            },
            "0x6807dc923806fE8Fd134338EABCA509979a7e0cB",
            None,
        ),
        "monad" => evm_probes(
            evm::EthCall {
                to: "0x754704Bc059F8C67012fEd69BC8A327a5aafb603",
                data: "0x70a082310000000000000000000000001985ea6e9c68e1c272d8209f3b478ac2fdb25c87",
            },
            "0x754704Bc059F8C67012fEd69BC8A327a5aafb603",
            Some("0x754704Bc059F8C67012fEd69BC8A327a5aafb603"),
        ),
        "hyperliquid" => hyperliquid_probes(),
        "solana" => solana_probes(),
        "ton" => ton_probes(),
        _ => return None,
    };
    Some(probes)
}

fn evm_probes(call: evm::EthCall, balance_of: &'static str, logs_of: Option<&'static str>) -> Vec<ProbeKind> {
    let mut probes = vec![
        ProbeKind::subscription(evm::NewHeads),
        ProbeKind::rpc(evm::BlockNumber),
        ProbeKind::rpc(call),
        ProbeKind::rpc(evm::GetBalance { address: balance_of }),
        ProbeKind::rpc(evm::TraceBlockByNumber),
        ProbeKind::rpc(evm::TraceTransaction),
        ProbeKind::rpc(evm::TransactionReceipt),
    ];
    if let Some(address) = logs_of {
        probes.push(ProbeKind::rpc(evm::GetLogs { address, topic: ERC20_TRANSFER }));
    }
    probes
}

fn hyperliquid_probes() -> Vec<ProbeKind> {
    const WHYPE: &str = "0x5555555555555555555555555555555555555555";
    const USER: &str = "0x31ca8395cf837de08b24da3f660e77761dfb974b";
    vec![
        ProbeKind::rpc(evm::BlockNumber),
        ProbeKind::rpc(evm::EthCall { to: WHYPE, data: "0x18160ddd" }),
        ProbeKind::rpc(evm::GetBalance { address: "0xFC1286EeddF81d6955eDAd5C8D99B8Aa32F3D2AA" }),
        ProbeKind::rpc(evm::TransactionReceipt),
        ProbeKind::rpc(evm::GetLogs {
            address: WHYPE,
            topic: "0x7fcf532c15f0a6db0bd6d0e038bea71d30d808c7d98cb3bf7268a95bf5081b65",
        }),
        ProbeKind::rpc(hyperliquid::InfoQuery { kind: "clearinghouseState", user: USER }),
        ProbeKind::rpc(hyperliquid::InfoQuery { kind: "openOrders", user: USER }),
    ]
}

fn solana_probes() -> Vec<ProbeKind> {
    vec![
        ProbeKind::rpc(solana::LatestBlockhash),
        ProbeKind::rpc(solana::SimulateTransaction),
        ProbeKind::rpc(solana::GetBalance { address: "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM" }),
        ProbeKind::rpc(solana::GetBlock),
        ProbeKind::rpc(solana::GetTransaction),
        ProbeKind::rpc(solana::GetProgramAccounts { program: "FsJ3A3u2vn5cTVofAjvy6y5kwABJAqYWpe4975bi2epH" }),
        ProbeKind::subscription(solana::BlockSubscribe),
    ]
}

fn ton_probes() -> Vec<ProbeKind> {
    const WALLET: &str = "EQDtFpEwcFAEcRe5mLVh2N6C0x-_hJEM7W61_JLnSF74p4q2";
    vec![
        ProbeKind::rpc(ton::BlockHeader),
        ProbeKind::rpc(ton::RunGetMethod {
            address: "EQCxE6mUtQJKFnGfaROTKOt1lZbDiiX1kCixRv7Nw2Id_sDs",
            method: "get_wallet_address",
            slice: "te6cckEBAQEAJAAAQ4AbUzrTQYTUv8s/I9ds2TSZgRjyrgl2S2LKcZMEFcxj6PARy3rF",
        }),
        ProbeKind::rpc(ton::AddressBalance { address: WALLET }),
        ProbeKind::rpc(ton::BlockTransactions { count: 40 }),
        ProbeKind::rpc(ton::WalletInformation { address: WALLET }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(registry: &Registry, chain: &str) -> Vec<String> {
        registry.registrations(chain).unwrap().iter().map(|r| r.kind.label().to_string()).collect()
    }

    #[test]
    fn test_every_chain_has_probes() {
        let catalog = Catalog::new("", false);
        let mut registry = Registry::new();
        for chain in CHAINS {
            catalog.register(&mut registry, chain, "iad1").unwrap();
            assert!(!registry.registrations(chain).unwrap().is_empty(), "{chain}");
        }
    }

    #[test]
    fn test_region_gating() {
        let catalog = Catalog::new("", true);
        let mut registry = Registry::new();
        catalog.register(&mut registry, "ethereum", "iad1").unwrap();
        catalog.register(&mut registry, "base", "iad1").unwrap();
        catalog.register(&mut registry, "hyperliquid", "hnd1").unwrap();
        assert!(registry.registrations("ethereum").unwrap().is_empty());
        assert_eq!(registry.registrations("base").unwrap().len(), 8);
        assert_eq!(registry.registrations("hyperliquid").unwrap().len(), 7);
    }

    #[test]
    fn test_chain_lists() {
        let catalog = Catalog::new("dev_", false);
        let mut registry = Registry::new();
        catalog.register(&mut registry, "Arbitrum", "fra1").unwrap();
        catalog.register(&mut registry, "solana", "fra1").unwrap();
        assert!(!labels(&registry, "arbitrum").contains(&"eth_getLogs".to_string()));
        assert_eq!(labels(&registry, "arbitrum")[0], "eth_subscribe");
        assert!(labels(&registry, "solana").contains(&"getProgramAccounts".to_string()));
        assert!(registry
            .registrations("solana")
            .unwrap()
            .iter()
            .all(|r| r.metric_name == "dev_response_latency_seconds"));
    }

    #[test]
    fn test_unknown_chain() {
        let mut registry = Registry::new();
        let err = Catalog::new("", true).register(&mut registry, "dogecoin", "fra1").unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");
        assert!(!registry.is_registered("dogecoin"));
    }

    #[test]
    fn test_landing_gated_to_fra1() {
        let catalog = Catalog::new("", true);
        let keypair = Arc::new(Keypair::new());

        let mut registry = Registry::new();
        catalog.register_landing(&mut registry, "sfo1", keypair.clone(), LandingSettings::default());
        assert!(registry.registrations("solana").unwrap().is_empty());

        let mut registry = Registry::new();
        catalog.register_landing(&mut registry, "fra1", keypair, LandingSettings::default());
        let regs = registry.registrations("solana").unwrap();
        assert_eq!(regs.len(), 1);
        assert_eq!(regs[0].metric_name, LANDING_LATENCY);
    }
}
