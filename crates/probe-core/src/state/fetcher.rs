//! Write side of the reference state: query a node directly for the current
//! head, one transaction in it and a randomly-offset historical block.
//!
//! A fetch never fails outward. Any unrecoverable error yields an empty
//! [`ReferenceState`] so one broken chain cannot block the others.

use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::state::reference::ReferenceState;
use crate::timing::json_headers;

/// Width of the downward search for an existing Solana slot.
pub const SLOT_SEARCH_WINDOW: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFamily {
    Evm,
    Solana,
    Ton,
}

impl ChainFamily {
    pub fn of(chain: &str) -> Option<Self> {
        match chain.to_lowercase().as_str() {
            "ethereum" | "base" | "arbitrum" | "bnb" | "monad" | "hyperliquid" => Some(ChainFamily::Evm),
            "solana" => Some(ChainFamily::Solana),
            "ton" => Some(ChainFamily::Ton),
            _ => None,
        }
    }
}

/// How far behind the head the historical reference point sits, inclusive.
pub fn default_offset_range(chain: &str) -> (u64, u64) {
    match chain.to_lowercase().as_str() {
        "ethereum" | "base" | "arbitrum" | "bnb" => (7_200, 14_400),
        "solana" => (432_000, 648_000),
        "ton" => (1_555_200, 1_572_480),
        _ => match ChainFamily::of(chain) {
            Some(ChainFamily::Solana) => (100, 1_000),
            Some(ChainFamily::Ton) => (10, 50),
            _ => (20, 100),
        },
    }
}

pub struct StateFetcher {
    client: reqwest::Client,
    endpoint: String,
    retries: u32,
    retry_delay: Duration,
    offsets: Option<(u64, u64)>,
}

impl StateFetcher {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build fetcher client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            retries: 3,
            retry_delay: Duration::from_secs(5),
            offsets: None,
        })
    }

    pub fn with_retry(mut self, retries: u32, retry_delay: Duration) -> Self {
        self.retries = retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Override the per-chain offset range.
    pub fn with_offsets(mut self, range: (u64, u64)) -> Self {
        self.offsets = Some(range);
        self
    }

    /// Fresh state for `chain`, or an empty state on any failure.
    pub async fn fetch(&self, chain: &str) -> ReferenceState {
        let result = match ChainFamily::of(chain) {
            Some(ChainFamily::Evm) => self.fetch_evm(chain).await,
            Some(ChainFamily::Solana) => self.fetch_solana(chain).await,
            Some(ChainFamily::Ton) => self.fetch_ton(chain).await,
            None => Err(Error::Configuration(format!("unsupported blockchain: {chain}"))),
        };
        match result {
            Ok(state) => {
                tracing::info!(
                    "{} state: block={} tx={} old_block={}",
                    chain,
                    state.block_id,
                    state.transaction_id,
                    state.old_block_id
                );
                state
            }
            Err(e) => {
                tracing::error!("{} state fetch failed [{}]: {}", chain, e.kind(), e);
                ReferenceState::default()
            }
        }
    }

    fn random_offset(&self, chain: &str) -> u64 {
        let (lo, hi) = self.offsets.unwrap_or_else(|| default_offset_range(chain));
        let (lo, hi) = (lo.min(hi), lo.max(hi));
        rand::thread_rng().gen_range(lo..=hi)
    }

    /// One JSON-RPC call with retries. "Block not available" is returned at
    /// once: during slot search it is expected, not transient.
    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let request = json!({"jsonrpc": "2.0", "method": method, "params": params, "id": 1});
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.rpc_once(&request).await {
                Ok(result) => return Ok(result),
                Err(e @ Error::BlockUnavailable(_)) => return Err(e),
                Err(e) if attempt < self.retries => {
                    tracing::warn!("{} attempt {}/{} failed: {}", method, attempt, self.retries, e);
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn rpc_once(&self, request: &Value) -> Result<Value> {
        let response = self
            .client
            .post(&self.endpoint)
            .headers(json_headers())
            .json(request)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(Error::Http { status: status.as_u16(), body: String::from_utf8_lossy(&body).into_owned() });
        }
        let data: Value = serde_json::from_slice(&body)?;
        if let Some(err) = data.get("error").filter(|e| !e.is_null()) {
            return Err(Error::from_rpc_error(err));
        }
        Ok(data.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn fetch_evm(&self, chain: &str) -> Result<ReferenceState> {
        let block = self.rpc("eth_getBlockByNumber", json!(["latest", true])).await?;
        let number_hex = block
            .get("number")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Malformed("latest block has no number".into()))?;
        let number = parse_hex(number_hex)?;
        let old_number = number.saturating_sub(self.random_offset(chain));

        let tx_hash = match block.get("transactions").and_then(|t| t.get(0)) {
            Some(Value::String(hash)) => hash.clone(),
            Some(tx) => tx.get("hash").and_then(Value::as_str).unwrap_or_default().to_string(),
            None => String::new(),
        };

        Ok(ReferenceState::new(number_hex, tx_hash, format!("{:#x}", old_number)))
    }

    /// First existing slot searching down from `from` to `to`, inclusive.
    async fn block_in_range(&self, from: u64, to: u64, signatures: bool) -> Result<(u64, Value)> {
        let details = if signatures { "signatures" } else { "none" };
        let mut slot = from;
        loop {
            let params = json!([slot, {
                "encoding": "json",
                "maxSupportedTransactionVersion": 0,
                "transactionDetails": details,
                "rewards": false
            }]);
            match self.rpc("getBlock", params).await {
                Ok(block) if !block.is_null() => return Ok((slot, block)),
                Ok(_) => tracing::trace!("slot {} empty", slot),
                Err(Error::BlockUnavailable(_)) => tracing::trace!("slot {} not available", slot),
                Err(e) => return Err(e),
            }
            if slot <= to {
                break;
            }
            slot -= 1;
        }
        Err(Error::BlockUnavailable(format!("no blocks found in slots {to}..={from}")))
    }

    async fn fetch_solana(&self, chain: &str) -> Result<ReferenceState> {
        let info = self.rpc("getLatestBlockhash", json!([{"commitment": "finalized"}])).await?;
        let latest = info
            .pointer("/context/slot")
            .and_then(Value::as_u64)
            .filter(|s| *s > 0)
            .ok_or_else(|| Error::Malformed("getLatestBlockhash returned no slot".into()))?;

        let (_, block) = self.block_in_range(latest, latest, true).await?;
        let signature = block
            .pointer("/signatures/0")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let target = latest.saturating_sub(self.random_offset(chain));
        let (old_slot, _) = self
            .block_in_range(target, target.saturating_sub(SLOT_SEARCH_WINDOW), false)
            .await?;

        Ok(ReferenceState::new(latest.to_string(), signature, old_slot.to_string()))
    }

    async fn fetch_ton(&self, chain: &str) -> Result<ReferenceState> {
        let info = self.rpc("getMasterchainInfo", json!([])).await?;
        let last = info
            .get("last")
            .filter(|l| l.is_object())
            .ok_or_else(|| Error::Malformed("invalid masterchain info".into()))?;
        let seqno = last
            .get("seqno")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Malformed("masterchain block has no seqno".into()))?;
        let workchain = last.get("workchain").cloned().unwrap_or(Value::Null);
        let shard = last.get("shard").cloned().unwrap_or(Value::Null);
        let old_seqno = seqno.saturating_sub(self.random_offset(chain));

        let block = self
            .rpc(
                "getBlockTransactions",
                json!({"workchain": workchain, "shard": shard, "seqno": seqno, "count": 1}),
            )
            .await?;
        let tx_id = block
            .pointer("/transactions/0/hash")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(ReferenceState::new(
            format!("{}:{}:{}", plain(&workchain), plain(&shard), seqno),
            tx_id,
            format!("{}:{}:{}", plain(&workchain), plain(&shard), old_seqno),
        ))
    }
}

fn parse_hex(s: &str) -> Result<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|_| Error::Malformed(format!("not a hex quantity: {s}")))
}

/// String values without JSON quotes, everything else as rendered.
fn plain(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
