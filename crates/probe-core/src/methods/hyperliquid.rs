//! Hyperliquid `/info` API queries. Not JSON-RPC: the body is `{type, user}`
//! posted to the info endpoint derived from the provider's EVM endpoint.

use serde_json::{json, Value};

use crate::error::Result;
use crate::probe::RpcMethod;
use crate::state::ReferenceState;

/// `.../evm` becomes `.../info`; anything else gets `/info` appended.
pub fn info_endpoint(base: &str) -> String {
    match base.strip_suffix("/evm") {
        Some(root) => format!("{root}/info"),
        None => format!("{}/info", base.trim_end_matches('/')),
    }
}

pub struct InfoQuery {
    pub kind: &'static str,
    pub user: &'static str,
}

impl RpcMethod for InfoQuery {
    fn name(&self) -> &str {
        self.kind
    }

    fn build_request(&self, _state: &ReferenceState) -> Result<Value> {
        Ok(json!({"type": self.kind, "user": self.user}))
    }

    fn endpoint(&self, base: &str) -> String {
        info_endpoint(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_endpoint() {
        assert_eq!(info_endpoint("https://node.example/abc/evm"), "https://node.example/abc/info");
        assert_eq!(info_endpoint("https://node.example/abc/"), "https://node.example/abc/info");
        assert_eq!(info_endpoint("https://node.example/abc"), "https://node.example/abc/info");
    }

    #[test]
    fn test_info_body() {
        let q = InfoQuery { kind: "openOrders", user: "0x31ca8395cf837de08b24da3f660e77761dfb974b" };
        assert_eq!(
            q.build_request(&ReferenceState::default()).unwrap(),
            json!({"type": "openOrders", "user": "0x31ca8395cf837de08b24da3f660e77761dfb974b"})
        );
        assert_eq!(q.endpoint("https://h/evm"), "https://h/info");
    }
}
