//! Error taxonomy shared by probes, the state store and the update path.

use std::time::Duration;

/// Every failure the harness can observe.
///
/// Probe-level variants (all but `Store` and `Configuration`) stay local to
/// one probe: they are recorded on its label set and logged, never propagated
/// past the collector. `Store` and `Configuration` are allowed to escalate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The probe's prerequisite reference data is missing or malformed.
    #[error("invalid reference state for {method}: {reason}")]
    Validation { method: String, reason: String },

    /// The probe's own deadline elapsed.
    #[error("collection exceeded {0:?} timeout")]
    Timeout(Duration),

    /// Connection refused/reset, DNS or TLS failure.
    #[error("transport: {0}")]
    Transport(String),

    /// Non-2xx status that was not a retried 429.
    #[error("http status {status}: {body}")]
    Http { status: u16, body: String },

    /// JSON-RPC response carried an `error` member.
    #[error("json-rpc error {code}: {message}")]
    JsonRpc { code: i64, message: String },

    /// Requested block or slot does not exist (JSON-RPC code -32004).
    #[error("block not available: {0}")]
    BlockUnavailable(String),

    /// Subscription was not acknowledged with a non-null result.
    #[error("subscription rejected: {0}")]
    Subscription(String),

    /// Response was received but could not be interpreted.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Measured latency exceeded the configured ceiling.
    #[error("latency {latency:.3}s above ceiling {ceiling:?}")]
    LatencyCeiling { latency: f64, ceiling: Duration },

    /// Blob list/fetch/write failed after its retry budget.
    #[error("state store: {0}")]
    Store(String),

    /// A probe panicked while collecting.
    #[error("probe aborted: {0}")]
    Aborted(String),

    /// Required configuration (endpoints, credentials, registrations) missing.
    #[error("configuration: {0}")]
    Configuration(String),
}

/// JSON-RPC error code used by Solana nodes for skipped or pruned slots.
pub const BLOCK_NOT_AVAILABLE: i64 = -32004;

impl Error {
    /// Short class name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "ValidationError",
            Error::Timeout(_) => "TimeoutError",
            Error::Transport(_) => "TransportError",
            Error::Http { .. }
            | Error::JsonRpc { .. }
            | Error::BlockUnavailable(_)
            | Error::Subscription(_)
            | Error::Malformed(_) => "ProtocolError",
            Error::LatencyCeiling { .. } => "LatencyCeilingError",
            Error::Aborted(_) => "AbortedError",
            Error::Store(_) => "StoreError",
            Error::Configuration(_) => "ConfigurationError",
        }
    }

    pub fn validation(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation { method: method.into(), reason: reason.into() }
    }

    /// Classify a JSON-RPC `error` object.
    pub fn from_rpc_error(err: &serde_json::Value) -> Self {
        let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or_default();
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        if code == BLOCK_NOT_AVAILABLE {
            Error::BlockUnavailable(message)
        } else {
            Error::JsonRpc { code, message }
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Error::Transport(format!("request timed out: {e}"));
        }
        match e.status() {
            Some(status) => Error::Http { status: status.as_u16(), body: e.to_string() },
            None => Error::Transport(e.to_string()),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(format!("websocket: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Malformed(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rpc_error_classification() {
        let e = Error::from_rpc_error(&json!({"code": -32004, "message": "Block not available for slot 12"}));
        assert!(matches!(e, Error::BlockUnavailable(_)));
        assert_eq!(e.kind(), "ProtocolError");

        let e = Error::from_rpc_error(&json!({"code": -32601, "message": "method not found"}));
        match e {
            Error::JsonRpc { code, message } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "method not found");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_kinds() {
        assert_eq!(Error::Timeout(Duration::from_secs(1)).kind(), "TimeoutError");
        assert_eq!(Error::validation("getBlock", "no slot").kind(), "ValidationError");
        assert_eq!(Error::Store("x".into()).kind(), "StoreError");
    }
}
