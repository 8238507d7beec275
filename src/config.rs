//! `probe.toml` configuration plus the deployment facts read from the
//! environment.

use anyhow::{Context, Result};
use probe_core::{BlobConfig, EndpointsDocument, ProbeSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Top-level probe configuration. Every section and field is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub collector: CollectorConfig,
    pub push: PushConfig,
    pub store: StoreConfig,
    pub state: StateConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Per-probe deadline.
    pub timeout_secs: u64,
    /// Successful readings above this are recorded as failures.
    pub max_latency_secs: u64,
    /// Prefix for every metric name. Omit to derive from `VERCEL_ENV`
    /// (`dev_` outside production).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_prefix: Option<String>,
    /// Only run each chain from its allowed regions.
    pub region_gating: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self { timeout_secs: 55, max_latency_secs: 55, metric_prefix: None, region_gating: true }
    }
}

/// Metrics backend push policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PushConfig {
    pub retries: u32,
    pub retry_delay_secs: u64,
    pub timeout_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self { retries: 3, retry_delay_secs: 1, timeout_secs: 3 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub base_url: String,
    pub filename: String,
    /// Omit to derive from `VERCEL_ENV` (`prod-rpc-dashboard` / `dev-rpc-dashboard`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    /// Whole list+fetch attempts when reading the state document.
    pub retries: u32,
    pub retry_delay_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: probe_core::state::blob::DEFAULT_BASE_URL.into(),
            filename: probe_core::state::blob::DEFAULT_FILENAME.into(),
            folder: None,
            retries: 3,
            retry_delay_secs: 3,
            request_timeout_secs: 10,
        }
    }
}

/// Reference-state update path.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StateConfig {
    pub chains: Vec<String>,
    /// Provider names whose endpoints may be used for the update.
    pub providers: Vec<String>,
    /// Regions allowed to run the update.
    pub regions: Vec<String>,
    /// Per-chain `[min, max]` historical block offsets.
    pub offsets: BTreeMap<String, [u64; 2]>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            chains: ["ethereum", "solana", "ton", "base"].map(String::from).to_vec(),
            providers: vec!["Chainstack".into()],
            regions: vec!["fra1".into()],
            offsets: BTreeMap::new(),
        }
    }
}

impl ProbeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let cfg: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(cfg)
    }

    /// The config file is optional; a missing file means all defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("{} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Example config with every default spelled out, including one offset override.
    pub fn default_example() -> Self {
        let mut cfg = Self::default();
        cfg.collector.metric_prefix = Some("dev_".into());
        cfg.store.folder = Some("dev-rpc-dashboard".into());
        cfg.state.offsets.insert("ethereum".into(), [7_200, 14_400]);
        cfg
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            timeout: Duration::from_secs(self.collector.timeout_secs),
            max_latency: Duration::from_secs(self.collector.max_latency_secs),
        }
    }

    pub fn metric_prefix(&self, env: &Environment) -> String {
        match &self.collector.metric_prefix {
            Some(prefix) => prefix.clone(),
            None if env.is_production() => String::new(),
            None => "dev_".into(),
        }
    }

    /// Store settings, or `None` without blob credentials.
    pub fn blob_config(&self, env: &Environment) -> Option<BlobConfig> {
        let (token, store_id) = (env.blob_token.as_ref()?, env.store_id.as_ref()?);
        let folder = match &self.store.folder {
            Some(folder) => folder.clone(),
            None if env.is_production() => "prod-rpc-dashboard".into(),
            None => "dev-rpc-dashboard".into(),
        };
        let mut blob = BlobConfig::new(token.clone(), store_id.clone(), folder);
        blob.base_url = self.store.base_url.clone();
        blob.filename = self.store.filename.clone();
        blob.request_timeout = Duration::from_secs(self.store.request_timeout_secs);
        Some(blob)
    }
}

// ---- environment ----

/// Basic-auth credentials for the metrics backend.
#[derive(Debug, Clone)]
pub struct GrafanaCredentials {
    pub url: String,
    pub user: String,
    pub api_key: String,
}

/// Secrets and deployment facts. Read once per process.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub region: String,
    pub vercel_env: Option<String>,
    pub endpoints: EndpointsDocument,
    pub grafana: Option<GrafanaCredentials>,
    pub blob_token: Option<String>,
    pub store_id: Option<String>,
    pub cron_secret: String,
    pub skip_auth: bool,
    pub solana_private_key: Option<String>,
}

impl Environment {
    /// Read from the process environment. `endpoints_file` overrides `ENDPOINTS`.
    pub fn from_env(endpoints_file: Option<&Path>) -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), endpoints_file)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, endpoints_file: Option<&Path>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let endpoints_text = match endpoints_file {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read endpoints file: {}", path.display()))?,
            ),
            None => var("ENDPOINTS"),
        };
        let endpoints = match endpoints_text {
            Some(text) => EndpointsDocument::from_json(&text).context("failed to parse endpoints document")?,
            None => {
                tracing::warn!("ENDPOINTS is not set; no providers configured");
                EndpointsDocument::default()
            }
        };

        let grafana = match (var("GRAFANA_URL"), var("GRAFANA_USER"), var("GRAFANA_API_KEY")) {
            (Some(url), Some(user), Some(api_key)) => Some(GrafanaCredentials { url, user, api_key }),
            _ => None,
        };

        Ok(Self {
            region: var("VERCEL_REGION").unwrap_or_else(|| "default".into()),
            vercel_env: var("VERCEL_ENV"),
            endpoints,
            grafana,
            blob_token: var("VERCEL_BLOB_TOKEN"),
            store_id: var("STORE_ID"),
            cron_secret: var("CRON_SECRET").unwrap_or_default(),
            skip_auth: var("SKIP_AUTH").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            solana_private_key: var("SOLANA_PRIVATE_KEY"),
        })
    }

    pub fn is_production(&self) -> bool {
        self.vercel_env.as_deref() == Some("production")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Environment::from_lookup(|k| map.get(k).cloned(), None).unwrap()
    }

    #[test]
    fn test_empty_config_is_all_defaults() {
        let cfg: ProbeConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.collector.timeout_secs, 55);
        assert!(cfg.collector.region_gating);
        assert_eq!(cfg.push.retries, 3);
        assert_eq!(cfg.store.filename, "blockchain-data.json");
        assert_eq!(cfg.state.chains, ["ethereum", "solana", "ton", "base"]);
    }

    #[test]
    fn test_partial_sections() {
        let cfg: ProbeConfig = toml::from_str(
            "[collector]\ntimeout_secs = 20\n\n[state]\nregions = [\"sfo1\"]\n\n[state.offsets]\nsolana = [100, 200]\n",
        )
        .unwrap();
        assert_eq!(cfg.probe_settings().timeout, Duration::from_secs(20));
        assert_eq!(cfg.probe_settings().max_latency, Duration::from_secs(55));
        assert_eq!(cfg.state.regions, ["sfo1"]);
        assert_eq!(cfg.state.offsets["solana"], [100, 200]);
        assert_eq!(cfg.state.providers, ["Chainstack"]);
    }

    #[test]
    fn test_example_round_trips() {
        let text = toml::to_string_pretty(&ProbeConfig::default_example()).unwrap();
        let back: ProbeConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.collector.metric_prefix.as_deref(), Some("dev_"));
        assert_eq!(back.state.offsets["ethereum"], [7_200, 14_400]);
    }

    #[test]
    fn test_prefix_and_folder_follow_environment() {
        let cfg = ProbeConfig::default();
        let prod = env(&[("VERCEL_ENV", "production"), ("VERCEL_BLOB_TOKEN", "t"), ("STORE_ID", "s")]);
        let dev = env(&[("VERCEL_BLOB_TOKEN", "t"), ("STORE_ID", "s")]);
        assert_eq!(cfg.metric_prefix(&prod), "");
        assert_eq!(cfg.metric_prefix(&dev), "dev_");
        assert_eq!(cfg.blob_config(&prod).unwrap().folder, "prod-rpc-dashboard");
        assert_eq!(cfg.blob_config(&dev).unwrap().folder, "dev-rpc-dashboard");
        assert!(cfg.blob_config(&env(&[])).is_none());
    }

    #[test]
    fn test_environment() {
        let e = env(&[
            ("VERCEL_REGION", "fra1"),
            ("ENDPOINTS", r#"{"providers": [{"blockchain": "Solana", "name": "x", "http_endpoint": "http://x"}]}"#),
            ("GRAFANA_URL", "http://g"),
            ("GRAFANA_USER", "u"),
            ("SKIP_AUTH", "TRUE"),
        ]);
        assert_eq!(e.region, "fra1");
        assert_eq!(e.endpoints.providers_for("solana").len(), 1);
        assert!(e.grafana.is_none());
        assert!(e.skip_auth);
        assert_eq!(env(&[]).region, "default");
    }

    #[test]
    fn test_bad_endpoints_document() {
        let result = Environment::from_lookup(|k| (k == "ENDPOINTS").then(|| "not json".to_string()), None);
        assert!(result.is_err());
    }
}
