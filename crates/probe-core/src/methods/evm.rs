//! EVM JSON-RPC methods, shared by every EVM chain with per-chain targets.

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::methods::age_since;
use crate::probe::RpcMethod;
use crate::state::ReferenceState;
use crate::ws_probe::Subscription;

/// Block span covered by `eth_getLogs`, starting at the historical block.
pub const LOGS_BLOCK_SPAN: u64 = 100;

fn parse_quantity(s: &str) -> Option<u64> {
    u64::from_str_radix(s.strip_prefix("0x")?, 16).ok()
}

pub struct BlockNumber;

impl RpcMethod for BlockNumber {
    fn name(&self) -> &str {
        "eth_blockNumber"
    }
}

/// Read-only contract call against the latest block.
pub struct EthCall {
    pub to: &'static str,
    pub data: &'static str,
}

impl RpcMethod for EthCall {
    fn name(&self) -> &str {
        "eth_call"
    }

    fn params(&self, _state: &ReferenceState) -> Result<Value> {
        Ok(json!([{"to": self.to, "data": self.data}, "latest"]))
    }
}

/// Balance at the historical block, forcing an archive-style read.
pub struct GetBalance {
    pub address: &'static str,
}

impl RpcMethod for GetBalance {
    fn name(&self) -> &str {
        "eth_getBalance"
    }

    fn validate(&self, state: &ReferenceState) -> bool {
        !state.old_block_id.is_empty()
    }

    fn params(&self, state: &ReferenceState) -> Result<Value> {
        Ok(json!([self.address, state.old_block_id]))
    }
}

pub struct TransactionReceipt;

impl RpcMethod for TransactionReceipt {
    fn name(&self) -> &str {
        "eth_getTransactionReceipt"
    }

    fn validate(&self, state: &ReferenceState) -> bool {
        !state.transaction_id.is_empty()
    }

    fn params(&self, state: &ReferenceState) -> Result<Value> {
        Ok(json!([state.transaction_id]))
    }
}

pub struct TraceTransaction;

impl RpcMethod for TraceTransaction {
    fn name(&self) -> &str {
        "debug_traceTransaction"
    }

    fn validate(&self, state: &ReferenceState) -> bool {
        !state.transaction_id.is_empty()
    }

    fn params(&self, state: &ReferenceState) -> Result<Value> {
        Ok(json!([state.transaction_id, {"tracer": "callTracer"}]))
    }
}

pub struct TraceBlockByNumber;

impl RpcMethod for TraceBlockByNumber {
    fn name(&self) -> &str {
        "debug_traceBlockByNumber"
    }

    fn params(&self, _state: &ReferenceState) -> Result<Value> {
        Ok(json!(["latest", {"tracer": "callTracer"}]))
    }
}

/// Last block of the logs window starting at `old_block`.
fn logs_end(old_block: &str) -> Option<u64> {
    parse_quantity(old_block)?.checked_add(LOGS_BLOCK_SPAN)
}

/// Logs of one contract/topic over [`LOGS_BLOCK_SPAN`] blocks from the historical block.
pub struct GetLogs {
    pub address: &'static str,
    pub topic: &'static str,
}

impl RpcMethod for GetLogs {
    fn name(&self) -> &str {
        "eth_getLogs"
    }

    fn validate(&self, state: &ReferenceState) -> bool {
        logs_end(&state.old_block_id).is_some()
    }

    fn params(&self, state: &ReferenceState) -> Result<Value> {
        let to = logs_end(&state.old_block_id)
            .ok_or_else(|| Error::validation(self.name(), "old block is not a usable hex quantity"))?;
        Ok(json!([{
            "fromBlock": state.old_block_id,
            "toBlock": format!("{:#x}", to),
            "address": self.address,
            "topics": [self.topic.trim()],
        }]))
    }
}

/// `newHeads` subscription; latency is the age of the pushed header.
pub struct NewHeads;

impl Subscription for NewHeads {
    fn method(&self) -> &str {
        "eth_subscribe"
    }

    fn subscribe_request(&self) -> Value {
        json!({"id": 1, "jsonrpc": "2.0", "method": "eth_subscribe", "params": ["newHeads"]})
    }

    fn unsubscribe_request(&self, subscription_id: &Value) -> Value {
        json!({"id": 2, "jsonrpc": "2.0", "method": "eth_unsubscribe", "params": [subscription_id]})
    }

    fn process(&self, header: &Value) -> Result<f64> {
        let ts = header
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_quantity)
            .ok_or_else(|| Error::Malformed(format!("header without hex timestamp: {header}")))?;
        Ok(age_since(ts as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ReferenceState {
        ReferenceState::new("0x1500", "0xfeed", "0x1000")
    }

    #[test]
    fn test_eth_call_envelope() {
        let call = EthCall { to: "0xc2edad668740f1aa35e4d8f227fb8e17dca888cd", data: "0x1526fe27" };
        assert_eq!(
            call.build_request(&ReferenceState::default()).unwrap(),
            json!({
                "id": 1, "jsonrpc": "2.0", "method": "eth_call",
                "params": [{"to": "0xc2edad668740f1aa35e4d8f227fb8e17dca888cd", "data": "0x1526fe27"}, "latest"]
            })
        );
    }

    #[test]
    fn test_state_dependent_validation() {
        let empty = ReferenceState::default();
        assert!(!GetBalance { address: "0x0" }.validate(&empty));
        assert!(!TransactionReceipt.validate(&empty));
        assert!(!TraceTransaction.validate(&empty));
        assert!(BlockNumber.validate(&empty));
        assert!(TraceBlockByNumber.validate(&empty));
        assert!(TransactionReceipt.validate(&state()));
    }

    #[test]
    fn test_get_logs_range() {
        let logs = GetLogs { address: "0x5555555555555555555555555555555555555555", topic: " 0x7fcf" };
        let params = logs.params(&state()).unwrap();
        assert_eq!(params[0]["fromBlock"], "0x1000");
        assert_eq!(params[0]["toBlock"], "0x1064");
        assert_eq!(params[0]["topics"], json!(["0x7fcf"]));
        assert!(!logs.validate(&ReferenceState::new("0x1", "0x2", "12345")));
    }

    #[test]
    fn test_get_logs_rejects_window_past_u64() {
        let logs = GetLogs { address: "0x5555555555555555555555555555555555555555", topic: "0x7fcf" };
        let near_max = ReferenceState::new("0x1", "0x2", "0xffffffffffffffff");
        assert!(!logs.validate(&near_max));
        assert_eq!(logs.params(&near_max).unwrap_err().kind(), "ValidationError");

        let last_ok = ReferenceState::new("0x1", "0x2", format!("{:#x}", u64::MAX - LOGS_BLOCK_SPAN));
        assert!(logs.validate(&last_ok));
        assert_eq!(logs.params(&last_ok).unwrap()[0]["toBlock"], format!("{:#x}", u64::MAX));
    }

    #[test]
    fn test_new_heads_age() {
        let now = chrono::Utc::now().timestamp() as u64;
        let header = json!({"number": "0x10", "timestamp": format!("{:#x}", now - 3)});
        let age = NewHeads.process(&header).unwrap();
        assert!((2.0..6.0).contains(&age));
        assert!(NewHeads.process(&json!({"number": "0x10"})).is_err());
        assert_eq!(NewHeads.unsubscribe_request(&json!("0xab"))["params"], json!(["0xab"]));
    }
}
