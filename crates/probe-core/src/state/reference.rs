//! Reference state: recent block/transaction identifiers per chain, and the
//! JSON document that carries one entry per chain plus `updated_at`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const UPDATED_AT: &str = "updated_at";

/// Identifiers used as realistic query targets. Empty means unavailable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceState {
    #[serde(rename = "block", alias = "block_id", default, deserialize_with = "lenient_string")]
    pub block_id: String,
    #[serde(rename = "tx", alias = "transaction_id", default, deserialize_with = "lenient_string")]
    pub transaction_id: String,
    #[serde(rename = "old_block", alias = "old_block_id", default, deserialize_with = "lenient_string")]
    pub old_block_id: String,
}

impl ReferenceState {
    pub fn new(block_id: impl Into<String>, transaction_id: impl Into<String>, old_block_id: impl Into<String>) -> Self {
        Self {
            block_id: block_id.into(),
            transaction_id: transaction_id.into(),
            old_block_id: old_block_id.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.block_id.is_empty() && self.transaction_id.is_empty() && self.old_block_id.is_empty()
    }

    /// A freshly fetched state is only worth writing with both head identifiers.
    pub fn has_head(&self) -> bool {
        !self.block_id.is_empty() && !self.transaction_id.is_empty()
    }
}

/// Older writers stored slots as numbers; `null` reads as empty.
fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// The whole blob: chain name to state, plus the write timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDocument {
    pub chains: BTreeMap<String, ReferenceState>,
    pub updated_at: Option<i64>,
}

impl StateDocument {
    /// Parse leniently: non-object entries are skipped, missing fields are empty.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Malformed("state document is not a JSON object".into()))?;

        let mut doc = StateDocument::default();
        for (key, entry) in obj {
            if key == UPDATED_AT {
                doc.updated_at = entry.as_i64();
                continue;
            }
            if !entry.is_object() {
                tracing::debug!("skipping non-object state entry '{}'", key);
                continue;
            }
            let state: ReferenceState = serde_json::from_value(entry.clone())?;
            doc.chains.insert(key.to_lowercase(), state);
        }
        Ok(doc)
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        for (chain, state) in &self.chains {
            obj.insert(chain.clone(), serde_json::to_value(state).unwrap_or(Value::Null));
        }
        if let Some(ts) = self.updated_at {
            obj.insert(UPDATED_AT.to_string(), Value::from(ts));
        }
        Value::Object(obj)
    }

    /// State for `chain`, or an empty state when the chain is absent.
    pub fn get(&self, chain: &str) -> ReferenceState {
        self.chains.get(&chain.to_lowercase()).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_field_names() {
        let state = ReferenceState::new("0x10", "0xab", "0x1");
        assert_eq!(serde_json::to_value(&state).unwrap(), json!({"block": "0x10", "tx": "0xab", "old_block": "0x1"}));
    }

    #[test]
    fn test_missing_old_block_reads_empty() {
        let doc = StateDocument::from_value(&json!({
            "ethereum": {"block": "0x10", "tx": "0xab"},
            "updated_at": 1_700_000_000
        }))
        .unwrap();
        assert_eq!(doc.get("ethereum"), ReferenceState::new("0x10", "0xab", ""));
        assert_eq!(doc.updated_at, Some(1_700_000_000));
    }

    #[test]
    fn test_numeric_and_null_fields() {
        let doc = StateDocument::from_value(&json!({
            "solana": {"block": 312_000_000u64, "tx": null, "old_block": "311000000"},
            "note": "ignored"
        }))
        .unwrap();
        let state = doc.get("Solana");
        assert_eq!(state.block_id, "312000000");
        assert_eq!(state.transaction_id, "");
        assert_eq!(doc.chains.len(), 1);
    }

    #[test]
    fn test_absent_chain_is_empty() {
        let doc = StateDocument::from_value(&json!({})).unwrap();
        assert!(doc.get("ton").is_empty());
        assert!(StateDocument::from_value(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_has_head() {
        assert!(ReferenceState::new("1", "a", "").has_head());
        assert!(!ReferenceState::new("1", "", "0").has_head());
    }
}
