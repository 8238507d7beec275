//! `chainprobe update-state`: refresh the shared reference-state document.
//!
//! Region-gated and restricted to configured providers so only one node per
//! chain is queried. Chains whose fetch comes back empty keep their previous
//! state; chains with neither are left out of the write.

use anyhow::{bail, Result};
use futures_util::future::join_all;
use probe_core::{BlobStore, Error, ReferenceState, StateCache, StateDocument, StateFetcher};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Environment, ProbeConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    RegionNotAuthorized,
    NothingCollected,
    Updated { chains: Vec<String> },
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::RegionNotAuthorized => f.write_str("Region not authorized for state updates"),
            UpdateOutcome::NothingCollected => {
                f.write_str("No blockchain data collected and no previous data available")
            }
            UpdateOutcome::Updated { .. } => f.write_str("State updated successfully"),
        }
    }
}

pub struct StateManager<'a> {
    config: &'a ProbeConfig,
    env: &'a Environment,
    store: Arc<BlobStore>,
    fetch_retries: u32,
    fetch_retry_delay: Duration,
}

impl<'a> StateManager<'a> {
    pub fn new(config: &'a ProbeConfig, env: &'a Environment) -> Result<Self> {
        let Some(blob) = config.blob_config(env) else {
            bail!("missing blob storage configuration (VERCEL_BLOB_TOKEN, STORE_ID)");
        };
        Ok(Self {
            config,
            env,
            store: Arc::new(BlobStore::new(blob)?),
            fetch_retries: 3,
            fetch_retry_delay: Duration::from_secs(5),
        })
    }

    pub fn with_fetch_retry(mut self, retries: u32, delay: Duration) -> Self {
        self.fetch_retries = retries;
        self.fetch_retry_delay = delay;
        self
    }

    /// First allowed provider's HTTP endpoint for every configured chain.
    pub fn endpoints(&self) -> Result<BTreeMap<String, String>, Error> {
        let state = &self.config.state;
        let mut endpoints = BTreeMap::new();
        for chain in &state.chains {
            let chain = chain.to_lowercase();
            let found = self
                .env
                .endpoints
                .providers_for(&chain)
                .into_iter()
                .find(|p| state.providers.iter().any(|name| name == &p.name) && !p.http_endpoint.is_empty());
            if let Some(provider) = found {
                endpoints.insert(chain, provider.http_endpoint);
            }
        }

        let mut missing: Vec<&str> = state
            .chains
            .iter()
            .map(String::as_str)
            .filter(|c| !endpoints.contains_key(&c.to_lowercase()))
            .collect();
        if !missing.is_empty() {
            missing.sort_unstable();
            return Err(Error::Configuration(format!(
                "missing {} endpoints for: {}",
                state.providers.join("/"),
                missing.join(", ")
            )));
        }
        Ok(endpoints)
    }

    /// Previous document; unreadable means nothing to fall back on.
    async fn previous(&self) -> StateDocument {
        let cache = StateCache::new(self.store.clone())
            .with_retry(self.config.store.retries, Duration::from_secs(self.config.store.retry_delay_secs));
        match cache.document().await {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!("no previous state available: {}", e);
                StateDocument::default()
            }
        }
    }

    async fn fetch(&self, chain: String, endpoint: String) -> (String, ReferenceState) {
        let fetcher = match StateFetcher::new(endpoint) {
            Ok(fetcher) => fetcher.with_retry(self.fetch_retries, self.fetch_retry_delay),
            Err(e) => {
                tracing::error!("{}: {}", chain, e);
                return (chain, ReferenceState::default());
            }
        };
        let fetcher = match self.config.state.offsets.get(&chain) {
            Some([lo, hi]) => fetcher.with_offsets((*lo, *hi)),
            None => fetcher,
        };
        let state = fetcher.fetch(&chain).await;
        (chain, state)
    }

    pub async fn update(&self) -> Result<UpdateOutcome> {
        if !self.config.state.regions.iter().any(|r| r == &self.env.region) {
            tracing::info!("state update skipped in region {}", self.env.region);
            return Ok(UpdateOutcome::RegionNotAuthorized);
        }

        let previous = self.previous().await;
        let endpoints = self.endpoints()?;
        let fresh = join_all(endpoints.into_iter().map(|(chain, endpoint)| self.fetch(chain, endpoint))).await;

        let mut document = merge(fresh, &previous);
        if document.chains.is_empty() {
            tracing::warn!("no state collected and none stored; nothing written");
            return Ok(UpdateOutcome::NothingCollected);
        }
        document.updated_at = Some(chrono::Utc::now().timestamp());

        self.store.replace_document(&document.to_value()).await?;
        let chains: Vec<String> = document.chains.into_keys().collect();
        tracing::info!("reference state written for {}", chains.join(", "));
        Ok(UpdateOutcome::Updated { chains })
    }
}

/// Fresh state wins when it has both a block and a transaction; otherwise the
/// previous entry is kept, and a chain with neither is omitted.
pub fn merge(fresh: Vec<(String, ReferenceState)>, previous: &StateDocument) -> StateDocument {
    let mut merged = StateDocument::default();
    for (chain, state) in fresh {
        if state.has_head() {
            merged.chains.insert(chain, state);
            continue;
        }
        match previous.chains.get(&chain).filter(|s| !s.is_empty()) {
            Some(old) => {
                tracing::warn!("using previous state for {}", chain);
                merged.chains.insert(chain, old.clone());
            }
            None => tracing::warn!("no state for {}; leaving it out", chain),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_core::{EndpointsDocument, ProviderConfig};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOC_PATH: &str = "/dev-rpc-dashboard/blockchain-data.json";

    fn config(store: &MockServer) -> ProbeConfig {
        let mut config = ProbeConfig::default();
        config.store.base_url = store.uri();
        config.store.retries = 1;
        config.store.retry_delay_secs = 0;
        config.state.chains = vec!["ethereum".into()];
        config.state.offsets.insert("ethereum".into(), [16, 16]);
        config
    }

    fn env(region: &str, node: &str) -> Environment {
        let provider = |name: &str| ProviderConfig {
            blockchain: "Ethereum".into(),
            name: name.into(),
            http_endpoint: node.into(),
            websocket_endpoint: None,
            tx_endpoint: None,
            region: None,
        };
        Environment {
            region: region.into(),
            endpoints: EndpointsDocument { providers: vec![provider("Other"), provider("Chainstack")], region: None },
            blob_token: Some("tok".into()),
            store_id: Some("store".into()),
            ..Default::default()
        }
    }

    async fn mount_listing(store: &MockServer, with_document: bool) {
        let blobs = if with_document {
            json!([{"pathname": DOC_PATH.trim_start_matches('/'), "url": format!("{}{}", store.uri(), DOC_PATH)}])
        } else {
            json!([])
        };
        Mock::given(method("GET"))
            .and(path("/"))
            .and(query_param("prefix", "dev-rpc-dashboard/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "blobs": blobs })))
            .mount(store)
            .await;
    }

    #[tokio::test]
    async fn test_fresh_state_written() {
        let store = MockServer::start().await;
        let node = MockServer::start().await;
        mount_listing(&store, false).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": {"number": "0x100", "transactions": ["0xabc"]}
            })))
            .mount(&node)
            .await;
        Mock::given(method("PUT"))
            .and(path(DOC_PATH))
            .and(body_partial_json(json!({"ethereum": {"block": "0x100", "tx": "0xabc", "old_block": "0xf0"}})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&store)
            .await;

        let config = config(&store);
        let env = env("fra1", &node.uri());
        let outcome = StateManager::new(&config, &env).unwrap().update().await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Updated { chains: vec!["ethereum".into()] });
        assert_eq!(outcome.to_string(), "State updated successfully");
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_state() {
        let store = MockServer::start().await;
        let node = MockServer::start().await;
        mount_listing(&store, true).await;
        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ethereum": {"block": "0x1", "tx": "0x2", "old_block": "0x0"},
                "updated_at": 1
            })))
            .mount(&store)
            .await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(503)).mount(&node).await;
        Mock::given(method("POST"))
            .and(path("/delete"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&store)
            .await;
        Mock::given(method("PUT"))
            .and(path(DOC_PATH))
            .and(body_partial_json(json!({"ethereum": {"block": "0x1", "tx": "0x2", "old_block": "0x0"}})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&store)
            .await;

        let config = config(&store);
        let env = env("fra1", &node.uri());
        let manager = StateManager::new(&config, &env).unwrap().with_fetch_retry(1, Duration::from_millis(1));
        let outcome = manager.update().await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Updated { chains: vec!["ethereum".into()] });
    }

    #[tokio::test]
    async fn test_nothing_fresh_nothing_previous_writes_nothing() {
        let store = MockServer::start().await;
        let node = MockServer::start().await;
        mount_listing(&store, false).await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(503)).mount(&node).await;
        Mock::given(method("PUT")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&store).await;

        let config = config(&store);
        let env = env("fra1", &node.uri());
        let manager = StateManager::new(&config, &env).unwrap().with_fetch_retry(1, Duration::from_millis(1));
        assert_eq!(manager.update().await.unwrap(), UpdateOutcome::NothingCollected);
    }

    #[tokio::test]
    async fn test_region_gate() {
        let store = MockServer::start().await;
        let config = config(&store);
        let env = env("sfo1", "http://127.0.0.1:1");
        let outcome = StateManager::new(&config, &env).unwrap().update().await.unwrap();
        assert_eq!(outcome, UpdateOutcome::RegionNotAuthorized);
        assert!(store.received_requests().await.unwrap().is_empty());
    }

    #[test]
    fn test_missing_endpoints() {
        let store_uri = "http://127.0.0.1:1";
        let mut config = ProbeConfig::default();
        config.store.base_url = store_uri.into();
        let env = env("fra1", "http://node");
        let err = StateManager::new(&config, &env).unwrap().endpoints().unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");
        assert!(err.to_string().contains("base, solana, ton"));
    }

    #[test]
    fn test_missing_store_credentials() {
        let config = ProbeConfig::default();
        let env = Environment { region: "fra1".into(), ..Default::default() };
        assert!(StateManager::new(&config, &env).is_err());
    }

    #[test]
    fn test_merge() {
        let mut previous = StateDocument::default();
        previous.chains.insert("ton".into(), ReferenceState::new("0:8:1", "h", "0:8:0"));
        let fresh = vec![
            ("ethereum".to_string(), ReferenceState::new("0x10", "0xab", "0x1")),
            ("solana".to_string(), ReferenceState::new("5", "", "1")),
            ("ton".to_string(), ReferenceState::default()),
        ];
        let merged = merge(fresh, &previous);
        assert_eq!(merged.chains.len(), 2);
        assert_eq!(merged.get("ethereum").block_id, "0x10");
        assert_eq!(merged.get("ton").transaction_id, "h");
        assert!(!merged.chains.contains_key("solana"));
    }
}
