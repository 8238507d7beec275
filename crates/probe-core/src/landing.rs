//! Solana transaction-landing probe.
//!
//! Sends a small memo transaction with a priority fee and measures how long,
//! in seconds and in slots, it takes to reach `confirmed`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use solana_client::client_error::ClientError;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_commitment_config::CommitmentConfig;
use solana_instruction::Instruction;
use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::Signer;
use solana_transaction::Transaction;

use crate::error::{Error, Result};
use crate::labels::LabelKey;
use crate::metric::{ProbeMetric, RESPONSE_TIME};
use crate::probe::{settle, with_deadline, Probe, ProbeContext, ProbeSettings};

pub const SLOT_LATENCY: &str = "slot_latency";

const MEMO_PROGRAM: Pubkey = Pubkey::from_str_const("Memo1UhkJRfHyvLMcVucJwxXeuD728EqVDDwQDxFMNo");
const COMPUTE_BUDGET_PROGRAM: Pubkey = Pubkey::from_str_const("ComputeBudget111111111111111111111111111111");

#[derive(Debug, Clone, Copy)]
pub struct LandingSettings {
    pub compute_unit_limit: u32,
    pub priority_fee_micro_lamports: u64,
    /// Interval between signature-status polls.
    pub poll_interval: Duration,
}

impl Default for LandingSettings {
    fn default() -> Self {
        Self { compute_unit_limit: 1_000, priority_fee_micro_lamports: 200_000, poll_interval: Duration::from_secs(5) }
    }
}

/// Decode a base58 64-byte keypair.
pub fn keypair_from_base58(encoded: &str) -> Result<Keypair> {
    let bytes = bs58::decode(encoded.trim())
        .into_vec()
        .map_err(|e| Error::Configuration(format!("signing key is not base58: {e}")))?;
    Keypair::try_from(bytes.as_slice()).map_err(|e| Error::Configuration(format!("invalid signing key: {e}")))
}

/// Two-digit code identifying the sending region inside the memo.
pub fn region_code(region: &str) -> &'static str {
    match region {
        "sfo1" => "01",
        "fra1" => "02",
        "sin1" => "03",
        _ => "00",
    }
}

/// `<region>_<rand3>_<millis13>`, fixed length so every memo costs the same.
pub fn memo_text(region: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let random_id: u32 = rand::thread_rng().gen_range(0..=999);
    format!("{}_{:03}_{:013}", region_code(region), random_id, millis)
}

fn set_compute_unit_limit(units: u32) -> Instruction {
    let mut data = vec![2u8];
    data.extend_from_slice(&units.to_le_bytes());
    Instruction::new_with_bytes(COMPUTE_BUDGET_PROGRAM, &data, vec![])
}

fn set_compute_unit_price(micro_lamports: u64) -> Instruction {
    let mut data = vec![3u8];
    data.extend_from_slice(&micro_lamports.to_le_bytes());
    Instruction::new_with_bytes(COMPUTE_BUDGET_PROGRAM, &data, vec![])
}

fn memo_instructions(memo: &str, settings: &LandingSettings) -> Vec<Instruction> {
    vec![
        set_compute_unit_limit(settings.compute_unit_limit),
        set_compute_unit_price(settings.priority_fee_micro_lamports),
        Instruction::new_with_bytes(MEMO_PROGRAM, memo.as_bytes(), vec![]),
    ]
}

fn client_err(e: ClientError) -> Error {
    Error::Transport(e.to_string())
}

pub struct LandingProbe {
    metric: ProbeMetric,
    client: RpcClient,
    keypair: Arc<Keypair>,
    region: String,
    settings: ProbeSettings,
    landing: LandingSettings,
}

impl LandingProbe {
    pub fn new(metric_name: &str, keypair: Arc<Keypair>, landing: LandingSettings, ctx: &ProbeContext) -> Result<Self> {
        if ctx.endpoints.main_endpoint.is_empty() {
            return Err(Error::Configuration(format!("sendTransaction: no http endpoint for {}", ctx.provider)));
        }
        let mut labels = ctx.labels();
        labels.update(LabelKey::ApiMethod, "sendTransaction");

        Ok(Self {
            metric: ProbeMetric::new(metric_name, labels),
            client: RpcClient::new_with_commitment(ctx.endpoints.main_endpoint.clone(), CommitmentConfig::confirmed()),
            keypair,
            region: ctx.source_region.clone(),
            settings: ctx.settings,
            landing,
        })
    }

    async fn prepare(&self) -> Result<Transaction> {
        let memo = memo_text(&self.region);
        let blockhash = self.client.get_latest_blockhash().await.map_err(client_err)?;
        let payer = self.keypair.pubkey();
        Ok(Transaction::new_signed_with_payer(
            &memo_instructions(&memo, &self.landing),
            Some(&payer),
            &[self.keypair.as_ref()],
            blockhash,
        ))
    }

    /// Poll until the signature reaches `confirmed`; returns the slot of the
    /// status response that reported it.
    async fn confirm(&self, signature: &Signature) -> Result<u64> {
        loop {
            let response = self.client.get_signature_statuses(&[*signature]).await.map_err(client_err)?;
            let confirmed = response
                .value
                .first()
                .and_then(|s| s.as_ref())
                .is_some_and(|s| s.satisfies_commitment(CommitmentConfig::confirmed()));
            if confirmed {
                return Ok(response.context.slot);
            }
            tokio::time::sleep(self.landing.poll_interval).await;
        }
    }

    async fn land(&self) -> Result<Vec<(String, f64)>> {
        let tx = self.prepare().await?;
        let start_slot = self.client.get_slot().await.map_err(client_err)?;
        let started = Instant::now();

        let config = RpcSendTransactionConfig { skip_preflight: true, max_retries: Some(0), ..Default::default() };
        let signature = self.client.send_transaction_with_config(&tx, config).await.map_err(client_err)?;
        tracing::debug!("sent memo transaction {}", signature);

        let confirmed_slot = self.confirm(&signature).await?;
        let elapsed = started.elapsed().as_secs_f64();
        let slots = confirmed_slot.saturating_sub(start_slot);

        Ok(vec![(RESPONSE_TIME.to_string(), elapsed), (SLOT_LATENCY.to_string(), slots as f64)])
    }
}

#[async_trait]
impl Probe for LandingProbe {
    fn metric(&self) -> &ProbeMetric {
        &self.metric
    }

    fn metric_mut(&mut self) -> &mut ProbeMetric {
        &mut self.metric
    }

    async fn collect(&mut self) {
        // Both series exist even when the send fails.
        self.metric.set_value(RESPONSE_TIME, 0.0, None);
        self.metric.set_value(SLOT_LATENCY, 0.0, None);

        let outcome = with_deadline(self.settings.timeout, self.land()).await;
        settle(&mut self.metric, &self.settings, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::STATUS_FAILED;
    use crate::probe::EndpointConfig;
    use crate::state::ReferenceState;

    #[test]
    fn test_memo_shape() {
        let memo = memo_text("fra1");
        let parts: Vec<&str> = memo.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "02");
        assert_eq!(parts[1].len(), 3);
        assert_eq!(parts[2].len(), 13);
        assert_eq!(region_code("hnd1"), "00");
    }

    #[test]
    fn test_compute_budget_encoding() {
        let ixs = memo_instructions("02_001_0000000000000", &LandingSettings::default());
        assert_eq!(ixs.len(), 3);
        assert_eq!(ixs[0].program_id, COMPUTE_BUDGET_PROGRAM);
        assert_eq!(ixs[0].data, vec![2, 0xe8, 0x03, 0, 0]);
        assert_eq!(ixs[1].data, [vec![3u8], 200_000u64.to_le_bytes().to_vec()].concat());
        assert_eq!(ixs[2].program_id, MEMO_PROGRAM);
        assert_eq!(ixs[2].data, b"02_001_0000000000000".to_vec());
    }

    #[test]
    fn test_keypair_round_trip() {
        let kp = Keypair::new();
        let encoded = bs58::encode(kp.to_bytes()).into_string();
        let decoded = keypair_from_base58(&encoded).unwrap();
        assert_eq!(decoded.pubkey(), kp.pubkey());
        assert_eq!(keypair_from_base58("not-base58!").unwrap_err().kind(), "ConfigurationError");
    }

    #[tokio::test]
    async fn test_unreachable_node_fails_with_both_series() {
        let ctx = ProbeContext {
            endpoints: Arc::new(EndpointConfig { main_endpoint: "http://127.0.0.1:1".into(), ..Default::default() }),
            source_region: "fra1".into(),
            target_region: "fra1".into(),
            chain: "solana".into(),
            provider: "x".into(),
            state: Arc::new(ReferenceState::default()),
            settings: ProbeSettings { timeout: Duration::from_secs(5), max_latency: Duration::from_secs(55) },
        };
        let mut probe = LandingProbe::new("transaction_landing_latency", Arc::new(Keypair::new()), LandingSettings::default(), &ctx).unwrap();
        probe.collect().await;

        let m = probe.metric();
        assert_eq!(m.labels().get(LabelKey::ResponseStatus), Some(STATUS_FAILED));
        assert_eq!(m.labels().get(LabelKey::ApiMethod), Some("sendTransaction"));
        assert_eq!(m.value(RESPONSE_TIME), Some(0.0));
        assert_eq!(m.value(SLOT_LATENCY), Some(0.0));
    }
}
