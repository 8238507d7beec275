//! Remote object store holding the single reference-state document.
//!
//! The store has no in-place replace with a stable identity, so writers
//! delete every object under the folder and then PUT a fresh one. Two writers
//! racing here is accepted: the later PUT wins.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://blob.vercel-storage.com";
pub const DEFAULT_FILENAME: &str = "blockchain-data.json";

#[derive(Debug, Clone)]
pub struct BlobConfig {
    pub base_url: String,
    pub token: String,
    pub store_id: String,
    /// Folder (without trailing slash) that holds the document.
    pub folder: String,
    /// Suffix matched against listed pathnames.
    pub filename: String,
    pub request_timeout: Duration,
}

impl BlobConfig {
    pub fn new(token: impl Into<String>, store_id: impl Into<String>, folder: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
            store_id: store_id.into(),
            folder: folder.into(),
            filename: DEFAULT_FILENAME.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BlobEntry {
    pub pathname: String,
    pub url: String,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    blobs: Vec<BlobEntry>,
}

pub struct BlobStore {
    client: reqwest::Client,
    config: BlobConfig,
}

impl BlobStore {
    pub fn new(config: BlobConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build blob client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &BlobConfig {
        &self.config
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", self.config.token))?);
        headers.insert(HeaderName::from_static("x-store-id"), header_value(&self.config.store_id)?);
        Ok(headers)
    }

    fn write_headers(&self) -> Result<HeaderMap> {
        let mut headers = self.auth_headers()?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(HeaderName::from_static("x-add-random-suffix"), HeaderValue::from_static("false"));
        headers.insert(HeaderName::from_static("x-access"), HeaderValue::from_static("private"));
        headers.insert(HeaderName::from_static("x-cache-control-max-age"), HeaderValue::from_static("0"));
        headers.insert(HeaderName::from_static("x-mime-type"), HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Objects whose pathname starts with `prefix`.
    pub async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>> {
        let response = self
            .client
            .get(&self.config.base_url)
            .query(&[("prefix", prefix)])
            .headers(self.auth_headers()?)
            .send()
            .await
            .map_err(store_err)?;
        let body = check(response).await?;
        let listed: ListResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::Store(format!("unreadable blob listing: {e}")))?;
        Ok(listed.blobs)
    }

    pub async fn fetch(&self, url: &str) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .headers(self.auth_headers()?)
            .send()
            .await
            .map_err(store_err)?;
        let body = check(response).await?;
        serde_json::from_slice(&body).map_err(|e| Error::Store(format!("unreadable blob {url}: {e}")))
    }

    /// Write `document` at `pathname`, relative to the base URL.
    pub async fn put(&self, pathname: &str, document: &Value) -> Result<()> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), pathname);
        let response = self
            .client
            .put(&url)
            .headers(self.write_headers()?)
            .body(document.to_string())
            .send()
            .await
            .map_err(store_err)?;
        check(response).await?;
        tracing::debug!("wrote blob {}", pathname);
        Ok(())
    }

    pub async fn delete(&self, urls: &[String]) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        let url = format!("{}/delete", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .headers(self.write_headers()?)
            .body(json!({ "urls": urls }).to_string())
            .send()
            .await
            .map_err(store_err)?;
        check(response).await?;
        tracing::debug!("deleted {} blob(s)", urls.len());
        Ok(())
    }

    /// Locate the document under the folder; the stored name may carry a
    /// store-assigned suffix, so only the filename ending is matched.
    pub async fn find_document(&self) -> Result<BlobEntry> {
        let prefix = format!("{}/", self.config.folder);
        self.list(&prefix)
            .await?
            .into_iter()
            .find(|b| b.pathname.ends_with(&self.config.filename))
            .ok_or_else(|| Error::Store(format!("{} not found under {}", self.config.filename, prefix)))
    }

    pub async fn read_document(&self) -> Result<Value> {
        let entry = self.find_document().await?;
        self.fetch(&entry.url).await
    }

    /// Delete everything under the folder, then write `document` fresh.
    pub async fn replace_document(&self, document: &Value) -> Result<()> {
        let prefix = format!("{}/", self.config.folder);
        let existing: Vec<String> = self.list(&prefix).await?.into_iter().map(|b| b.url).collect();
        self.delete(&existing).await?;
        self.put(&format!("{}/{}", self.config.folder, self.config.filename), document).await
    }
}

fn header_value(s: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(s).map_err(|_| Error::Configuration("blob credentials contain invalid header characters".into()))
}

fn store_err(e: reqwest::Error) -> Error {
    Error::Store(e.to_string())
}

/// Any 2xx passes; anything else fails with the response body attached.
async fn check(response: reqwest::Response) -> Result<Vec<u8>> {
    let status = response.status();
    let body = response.bytes().await.map_err(store_err)?.to_vec();
    if status.is_success() {
        Ok(body)
    } else {
        Err(Error::Store(format!(
            "blob operation failed: {} - {}",
            status.as_u16(),
            String::from_utf8_lossy(&body)
        )))
    }
}
