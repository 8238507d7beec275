//! Per-chain request catalogue: independent value types plugged into the
//! probe harness through [`RpcMethod`](crate::probe::RpcMethod) and
//! [`Subscription`](crate::ws_probe::Subscription).

pub mod evm;
pub mod hyperliquid;
pub mod solana;
pub mod ton;

/// Seconds between `unix_secs` and now.
pub(crate) fn age_since(unix_secs: f64) -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0 - unix_secs
}
