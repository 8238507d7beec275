//! Wall-clock timing of single HTTP calls.
//!
//! Connection setup (DNS + TCP + TLS) is measured by a tower layer wrapped
//! around reqwest's connector, so it can be subtracted from the total and the
//! reported latency reflects request processing only. Each [`HttpTimer`] owns
//! its own client and therefore its own connect clock; share a timer only
//! between sequential calls.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde_json::Value;

use crate::error::{Error, Result};

/// Retry behaviour for HTTP 429 responses. Other statuses are never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Wait used when a 429 carries no parseable `Retry-After`.
    pub default_retry_after: Duration,
    /// Each successive wait is multiplied by this factor; 1.0 keeps the declared wait.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            default_retry_after: Duration::from_secs(3),
            backoff_multiplier: 1.0,
        }
    }
}

impl RetryPolicy {
    /// Wait before attempt `attempt + 1`, given the declared `Retry-After`.
    fn wait_for(&self, attempt: u32, declared: Option<Duration>) -> Duration {
        let base = declared.unwrap_or(self.default_retry_after);
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        base.mul_f64(factor)
    }
}

/// A completed call: elapsed time up to response headers, plus the body.
#[derive(Debug)]
pub struct TimedResponse {
    pub elapsed: Duration,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// Number of attempts made, including 429 retries.
    pub attempts: u32,
}

impl TimedResponse {
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub struct HttpTimer {
    client: reqwest::Client,
    clock: ConnectClock,
    retry: RetryPolicy,
}

impl HttpTimer {
    pub fn new(retry: RetryPolicy) -> Result<Self> {
        let clock = ConnectClock::default();
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .connector_layer(ConnectTimingLayer { clock: clock.clone() })
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, clock, retry })
    }

    /// Perform the call, retrying only on 429, and return the elapsed time of
    /// the final attempt. Non-2xx statuses are returned, not raised.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: Option<&HeaderMap>,
        body: Option<&Value>,
        exclude_connection_time: bool,
    ) -> Result<TimedResponse> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut request = self.client.request(method.clone(), url);
            if let Some(h) = headers {
                request = request.headers(h.clone());
            }
            if let Some(b) = body {
                request = request.json(b);
            }

            self.clock.reset();
            let started = Instant::now();
            let response = request.send().await?;
            let mut elapsed = started.elapsed();
            if exclude_connection_time {
                elapsed = elapsed.saturating_sub(self.clock.take());
            }

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS && attempt < max_attempts {
                let declared = retry_after(response.headers());
                let wait = self.retry.wait_for(attempt, declared);
                tracing::warn!(
                    "429 from {} (attempt {}/{}), retrying in {:?}",
                    url,
                    attempt,
                    max_attempts,
                    wait
                );
                drop(response);
                tokio::time::sleep(wait).await;
                continue;
            }

            let headers = response.headers().clone();
            let body = response.bytes().await?.to_vec();
            return Ok(TimedResponse { elapsed, status, headers, body, attempts: attempt });
        }
    }

    /// POST a JSON payload and return `(seconds, parsed body)`. A non-2xx
    /// status or an `error` member in the body is an error even on HTTP 200.
    pub async fn json_rpc(&self, url: &str, payload: &Value) -> Result<(f64, Value)> {
        let response = self
            .send(Method::POST, url, Some(&json_headers()), Some(payload), true)
            .await?;

        if !response.status.is_success() {
            return Err(Error::Http { status: response.status.as_u16(), body: response.text() });
        }

        let body = response.json()?;
        if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
            return Err(Error::from_rpc_error(err));
        }
        Ok((response.elapsed.as_secs_f64(), body))
    }
}

pub fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

/// `Retry-After` in delta-seconds form. HTTP-date values fall back to the default.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// ---------------------------------------------------------------------------
// Connector instrumentation
// ---------------------------------------------------------------------------

/// Accumulates time spent inside the connector since the last reset.
#[derive(Debug, Clone, Default)]
struct ConnectClock {
    spent: Arc<Mutex<Duration>>,
}

impl ConnectClock {
    fn add(&self, d: Duration) {
        if let Ok(mut spent) = self.spent.lock() {
            *spent += d;
        }
    }

    fn reset(&self) {
        if let Ok(mut spent) = self.spent.lock() {
            *spent = Duration::ZERO;
        }
    }

    fn take(&self) -> Duration {
        self.spent
            .lock()
            .map(|mut spent| std::mem::take(&mut *spent))
            .unwrap_or_default()
    }
}

#[derive(Clone)]
struct ConnectTimingLayer {
    clock: ConnectClock,
}

impl<S> tower::Layer<S> for ConnectTimingLayer {
    type Service = ConnectTiming<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConnectTiming { inner, clock: self.clock.clone() }
    }
}

/// Times every connector call; a pooled connection never reaches it.
#[derive(Clone)]
struct ConnectTiming<S> {
    inner: S,
    clock: ConnectClock,
}

impl<S, R> tower::Service<R> for ConnectTiming<S>
where
    S: tower::Service<R>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: R) -> Self::Future {
        let clock = self.clock.clone();
        let started = Instant::now();
        let fut = self.inner.call(req);
        Box::pin(async move {
            let out = fut.await;
            clock.add(started.elapsed());
            out
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> Value {
        json!({"id": 1, "jsonrpc": "2.0", "method": "eth_blockNumber"})
    }

    #[test]
    fn test_connect_clock_take_resets() {
        let clock = ConnectClock::default();
        clock.add(Duration::from_millis(30));
        clock.add(Duration::from_millis(20));
        assert_eq!(clock.take(), Duration::from_millis(50));
        assert_eq!(clock.take(), Duration::ZERO);
    }

    #[test]
    fn test_retry_wait_scaling() {
        let flat = RetryPolicy::default();
        assert_eq!(flat.wait_for(1, Some(Duration::from_secs(5))), Duration::from_secs(5));
        assert_eq!(flat.wait_for(2, None), Duration::from_secs(3));

        let doubling = RetryPolicy { backoff_multiplier: 2.0, ..Default::default() };
        assert_eq!(doubling.wait_for(3, Some(Duration::from_secs(1))), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_429_retries_honour_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": "0x10"})))
            .mount(&server)
            .await;

        let timer = HttpTimer::new(RetryPolicy { max_attempts: 3, ..Default::default() }).unwrap();
        let started = Instant::now();
        let response = timer
            .send(Method::POST, &server.uri(), Some(&json_headers()), Some(&payload()), true)
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.attempts, 3);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_429_returned_after_budget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .mount(&server)
            .await;

        let timer = HttpTimer::new(RetryPolicy::default()).unwrap();
        let err = timer.json_rpc(&server.uri(), &payload()).await.unwrap_err();
        assert!(matches!(err, Error::Http { status: 429, .. }));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_json_rpc_error_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "error": {"code": -32601, "message": "the method does not exist"}
            })))
            .mount(&server)
            .await;

        let timer = HttpTimer::new(RetryPolicy::default()).unwrap();
        let err = timer.json_rpc(&server.uri(), &payload()).await.unwrap_err();
        assert!(matches!(err, Error::JsonRpc { code: -32601, .. }));
    }

    #[tokio::test]
    async fn test_server_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let timer = HttpTimer::new(RetryPolicy { max_attempts: 3, ..Default::default() }).unwrap();
        match timer.json_rpc(&server.uri(), &payload()).await {
            Err(Error::Http { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "overloaded");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_success_returns_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": "0x1b4"})))
            .mount(&server)
            .await;

        let timer = HttpTimer::new(RetryPolicy::default()).unwrap();
        let (secs, body) = timer.json_rpc(&server.uri(), &payload()).await.unwrap();
        assert!(secs >= 0.0);
        assert_eq!(body["result"], "0x1b4");
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let timer = HttpTimer::new(RetryPolicy::default()).unwrap();
        let err = timer.json_rpc("http://127.0.0.1:1", &payload()).await.unwrap_err();
        assert_eq!(err.kind(), "TransportError");
    }
}
