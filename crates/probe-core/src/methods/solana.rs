//! Solana JSON-RPC methods and the `blockSubscribe` subscription.

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::methods::age_since;
use crate::probe::RpcMethod;
use crate::state::ReferenceState;
use crate::ws_probe::Subscription;

/// Pre-built token transfer; the node swaps in a recent blockhash.
const SIMULATED_TRANSFER: &str = "AQAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAABAAEDArczbMia1tLmq7zz4DinMNN0pJ1JtLdqIJPUw3YrGCzYAMHBsgN27lcgB6H2WQvFgyZuJYHa46puOQo9yQ8CVQbd9uHXZaGT2cvhRs7reawctIXtX1s3kTqM9YV+/wCp20C7Wj2aiuk5TReAXo+VTVg8QTHjs0UjNMMKCvpzZ+ABAgEBARU=";

pub struct LatestBlockhash;

impl RpcMethod for LatestBlockhash {
    fn name(&self) -> &str {
        "getLatestBlockhash"
    }
}

pub struct SimulateTransaction;

impl RpcMethod for SimulateTransaction {
    fn name(&self) -> &str {
        "simulateTransaction"
    }

    fn params(&self, _state: &ReferenceState) -> Result<Value> {
        Ok(json!([SIMULATED_TRANSFER, {"encoding": "base64", "replaceRecentBlockhash": true}]))
    }
}

pub struct GetBalance {
    pub address: &'static str,
}

impl RpcMethod for GetBalance {
    fn name(&self) -> &str {
        "getBalance"
    }

    fn params(&self, _state: &ReferenceState) -> Result<Value> {
        Ok(json!([self.address]))
    }
}

/// Historical block by slot, trimmed to headers only.
pub struct GetBlock;

impl RpcMethod for GetBlock {
    fn name(&self) -> &str {
        "getBlock"
    }

    fn validate(&self, state: &ReferenceState) -> bool {
        state.old_block_id.parse::<u64>().is_ok()
    }

    fn params(&self, state: &ReferenceState) -> Result<Value> {
        let slot: u64 = state
            .old_block_id
            .parse()
            .map_err(|_| Error::validation(self.name(), "old block is not a slot number"))?;
        Ok(json!([slot, {
            "encoding": "jsonParsed",
            "maxSupportedTransactionVersion": 0,
            "transactionDetails": "none",
            "rewards": false
        }]))
    }
}

pub struct GetTransaction;

impl RpcMethod for GetTransaction {
    fn name(&self) -> &str {
        "getTransaction"
    }

    fn validate(&self, state: &ReferenceState) -> bool {
        !state.transaction_id.is_empty()
    }

    fn params(&self, state: &ReferenceState) -> Result<Value> {
        Ok(json!([state.transaction_id, {"encoding": "jsonParsed", "maxSupportedTransactionVersion": 0}]))
    }
}

pub struct GetProgramAccounts {
    pub program: &'static str,
}

impl RpcMethod for GetProgramAccounts {
    fn name(&self) -> &str {
        "getProgramAccounts"
    }

    fn params(&self, _state: &ReferenceState) -> Result<Value> {
        Ok(json!([self.program, {"encoding": "jsonParsed"}]))
    }
}

/// `blockSubscribe`; latency is the age of the pushed block's `blockTime`.
/// Some providers reject `showRewards`, so the fallback omits it.
pub struct BlockSubscribe;

impl BlockSubscribe {
    fn request(show_rewards: bool) -> Value {
        let mut filter = json!({
            "commitment": "confirmed",
            "encoding": "json",
            "transactionDetails": "none",
            "maxSupportedTransactionVersion": 0
        });
        if show_rewards {
            filter["showRewards"] = json!(false);
        }
        json!({"id": 1, "jsonrpc": "2.0", "method": "blockSubscribe", "params": ["all", filter]})
    }
}

impl Subscription for BlockSubscribe {
    fn method(&self) -> &str {
        "blockSubscribe"
    }

    fn subscribe_request(&self) -> Value {
        Self::request(true)
    }

    fn fallback_request(&self) -> Option<Value> {
        Some(Self::request(false))
    }

    fn unsubscribe_request(&self, subscription_id: &Value) -> Value {
        json!({"id": 2, "jsonrpc": "2.0", "method": "blockUnsubscribe", "params": [subscription_id]})
    }

    fn extract(&self, message: &Value) -> Option<Value> {
        message.pointer("/params/result/value/block").filter(|b| b.is_object()).cloned()
    }

    fn process(&self, block: &Value) -> Result<f64> {
        let block_time = block
            .get("blockTime")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Malformed("block without blockTime".into()))?;
        Ok(age_since(block_time as f64))
    }
}
