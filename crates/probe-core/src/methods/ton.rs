//! TON HTTP API methods. Block ids travel as `workchain:shard:seqno`.

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::probe::RpcMethod;
use crate::state::ReferenceState;

/// Split a `workchain:shard:seqno` id.
pub fn parse_block_id(id: &str) -> Option<(i64, &str, u64)> {
    let mut parts = id.split(':');
    let workchain = parts.next()?.parse().ok()?;
    let shard = parts.next().filter(|s| !s.is_empty())?;
    let seqno = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((workchain, shard, seqno))
}

fn block_params(method: &str, id: &str) -> Result<Value> {
    let (workchain, shard, seqno) =
        parse_block_id(id).ok_or_else(|| Error::validation(method, format!("bad block id '{id}'")))?;
    Ok(json!({"workchain": workchain, "shard": shard, "seqno": seqno}))
}

pub struct BlockHeader;

impl RpcMethod for BlockHeader {
    fn name(&self) -> &str {
        "getBlockHeader"
    }

    fn validate(&self, state: &ReferenceState) -> bool {
        parse_block_id(&state.old_block_id).is_some()
    }

    fn params(&self, state: &ReferenceState) -> Result<Value> {
        block_params(self.name(), &state.old_block_id)
    }
}

pub struct BlockTransactions {
    pub count: u32,
}

impl RpcMethod for BlockTransactions {
    fn name(&self) -> &str {
        "getBlockTransactions"
    }

    fn validate(&self, state: &ReferenceState) -> bool {
        parse_block_id(&state.block_id).is_some()
    }

    fn params(&self, state: &ReferenceState) -> Result<Value> {
        let mut params = block_params(self.name(), &state.block_id)?;
        params["count"] = json!(self.count);
        Ok(params)
    }
}

/// Get-method call on a jetton master.
pub struct RunGetMethod {
    pub address: &'static str,
    pub method: &'static str,
    pub slice: &'static str,
}

impl RpcMethod for RunGetMethod {
    fn name(&self) -> &str {
        "runGetMethod"
    }

    fn params(&self, _state: &ReferenceState) -> Result<Value> {
        Ok(json!({"address": self.address, "method": self.method, "stack": [["tvm.Slice", self.slice]]}))
    }
}

pub struct AddressBalance {
    pub address: &'static str,
}

impl RpcMethod for AddressBalance {
    fn name(&self) -> &str {
        "getAddressBalance"
    }

    fn params(&self, _state: &ReferenceState) -> Result<Value> {
        Ok(json!({"address": self.address}))
    }
}

pub struct WalletInformation {
    pub address: &'static str,
}

impl RpcMethod for WalletInformation {
    fn name(&self) -> &str {
        "getWalletInformation"
    }

    fn params(&self, _state: &ReferenceState) -> Result<Value> {
        Ok(json!({"address": self.address}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_block_id() {
        assert_eq!(parse_block_id("-1:8000000000000000:40000000"), Some((-1, "8000000000000000", 40_000_000)));
        assert_eq!(parse_block_id("0x10"), None);
        assert_eq!(parse_block_id("-1::5"), None);
        assert_eq!(parse_block_id("-1:a:5:6"), None);
    }

    #[test]
    fn test_block_methods_use_their_own_id() {
        let state = ReferenceState::new("-1:8000000000000000:200", "tx=", "-1:8000000000000000:100");
        assert_eq!(
            BlockHeader.params(&state).unwrap(),
            json!({"workchain": -1, "shard": "8000000000000000", "seqno": 100})
        );
        let txs = BlockTransactions { count: 40 }.params(&state).unwrap();
        assert_eq!(txs["seqno"], 200);
        assert_eq!(txs["count"], 40);
    }

    #[test]
    fn test_block_methods_validate() {
        let state = ReferenceState::new("-1:8000000000000000:200", "", "");
        assert!(!BlockHeader.validate(&state));
        assert!(BlockTransactions { count: 40 }.validate(&state));
    }
}
