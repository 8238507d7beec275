//! Metrics backend push: one POST of newline-joined line protocol.
//!
//! A push that keeps failing is dropped with a warning. Collection has
//! already happened, so the caller still reports success.

use anyhow::{Context, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::time::Duration;

use crate::config::{GrafanaCredentials, PushConfig};

pub struct MetricsPusher {
    client: reqwest::Client,
    credentials: GrafanaCredentials,
    attempts: u32,
    retry_delay: Duration,
}

impl MetricsPusher {
    pub fn new(credentials: GrafanaCredentials, config: &PushConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build push client")?;
        Ok(Self {
            client,
            credentials,
            attempts: config.retries.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Returns whether the backend accepted the lines.
    pub async fn push(&self, lines: &[String]) -> bool {
        if lines.is_empty() {
            tracing::warn!("nothing to push");
            return false;
        }
        let body = lines.join("\n");

        for attempt in 1..=self.attempts {
            let sent = self
                .client
                .post(&self.credentials.url)
                .header(CONTENT_TYPE, "text/plain")
                .basic_auth(&self.credentials.user, Some(&self.credentials.api_key))
                .body(body.clone())
                .send()
                .await;

            match sent {
                Ok(resp) if matches!(resp.status(), StatusCode::OK | StatusCode::NO_CONTENT) => {
                    tracing::info!("pushed {} line(s) on attempt {}", lines.len(), attempt);
                    return true;
                }
                Ok(resp) => tracing::warn!("push attempt {}/{}: status {}", attempt, self.attempts, resp.status()),
                Err(e) => tracing::warn!("push attempt {}/{} failed: {}", attempt, self.attempts, e),
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        tracing::warn!("dropping {} line(s) after {} push attempts", lines.len(), self.attempts);
        false
    }
}
