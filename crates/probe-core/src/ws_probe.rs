//! Single-shot WebSocket subscription probe.
//!
//! Connect, subscribe, wait for one matching push, then unsubscribe and
//! close. The session lives outside the deadline-bounded future, so cleanup
//! still runs after the deadline fires mid-listen. If the whole probe future
//! is dropped instead, [`Session`]'s `Drop` hands cleanup to a spawned task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};
use crate::labels::LabelKey;
use crate::metric::{ProbeMetric, RESPONSE_TIME};
use crate::probe::{settle, with_deadline, Probe, ProbeContext, ProbeSettings};

/// Bound on connect, on the subscription acknowledgement and on close.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Protocol for one subscription type.
pub trait Subscription: Send + Sync {
    /// `api_method` label value.
    fn method(&self) -> &str;

    fn subscribe_request(&self) -> Value;

    /// Alternate subscribe shape tried once when the primary is rejected.
    fn fallback_request(&self) -> Option<Value> {
        None
    }

    fn unsubscribe_request(&self, subscription_id: &Value) -> Value;

    /// Payload of a matching push message; `None` for anything else.
    fn extract(&self, message: &Value) -> Option<Value> {
        message.get("params")?.get("result").cloned()
    }

    /// Latency in seconds. Negative values from clock skew are valid readings.
    fn process(&self, payload: &Value) -> Result<f64>;
}

struct Session {
    stream: Option<WsStream>,
    unsubscribe: Option<Value>,
}

impl Session {
    /// Unsubscribe (when subscribed) and close. Errors are logged only.
    async fn shutdown(&mut self) {
        let Some(mut stream) = self.stream.take() else { return };
        release(&mut stream, self.unsubscribe.take()).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(mut stream) = self.stream.take() else { return };
        let unsubscribe = self.unsubscribe.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { release(&mut stream, unsubscribe).await });
            }
            Err(_) => tracing::warn!("websocket session dropped outside a runtime, not unsubscribed"),
        }
    }
}

async fn release(stream: &mut WsStream, unsubscribe: Option<Value>) {
    if let Some(request) = unsubscribe {
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, stream.send(Message::Text(request.to_string().into()))).await {
            Ok(Ok(())) => tracing::debug!("unsubscribe sent"),
            Ok(Err(e)) => tracing::error!("error unsubscribing websocket: {}", e),
            Err(_) => tracing::error!("unsubscribe timed out"),
        }
    } else {
        tracing::warn!("no subscription id available, skipping unsubscribe");
    }
    match tokio::time::timeout(HANDSHAKE_TIMEOUT, stream.close(None)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("error closing websocket: {}", e),
        Err(_) => tracing::error!("websocket close timed out"),
    }
}

pub struct WsProbe {
    metric: ProbeMetric,
    subscription: Arc<dyn Subscription>,
    url: String,
    settings: ProbeSettings,
}

impl WsProbe {
    pub fn new(metric_name: &str, subscription: Arc<dyn Subscription>, ctx: &ProbeContext) -> Result<Self> {
        let url = ctx
            .endpoints
            .ws_endpoint
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::Configuration(format!("{}: no websocket endpoint for {}", subscription.method(), ctx.provider)))?;

        let mut labels = ctx.labels();
        labels.update(LabelKey::ApiMethod, subscription.method());

        Ok(Self { metric: ProbeMetric::new(metric_name, labels), subscription, url, settings: ctx.settings })
    }
}

#[async_trait]
impl Probe for WsProbe {
    fn metric(&self) -> &ProbeMetric {
        &self.metric
    }

    fn metric_mut(&mut self) -> &mut ProbeMetric {
        &mut self.metric
    }

    async fn collect(&mut self) {
        let mut slot: Option<Session> = None;
        let outcome = with_deadline(self.settings.timeout, run(self.subscription.as_ref(), &self.url, &mut slot)).await;

        if let Some(mut session) = slot.take() {
            session.shutdown().await;
        }

        let outcome = outcome
            .and_then(|payload| self.subscription.process(&payload))
            .map(|latency| vec![(RESPONSE_TIME.to_string(), latency)]);
        settle(&mut self.metric, &self.settings, outcome);
    }
}

async fn run(sub: &dyn Subscription, url: &str, slot: &mut Option<Session>) -> Result<Value> {
    let (stream, _) = tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(url))
        .await
        .map_err(|_| Error::Transport(format!("websocket connect to {url} timed out")))??;
    let session = slot.insert(Session { stream: Some(stream), unsubscribe: None });

    let id = subscribe(sub, session).await?;
    session.unsubscribe = Some(sub.unsubscribe_request(&id));

    let stream = session
        .stream
        .as_mut()
        .ok_or_else(|| Error::Transport("websocket session already closed".into()))?;
    loop {
        let message = next_json(stream).await?;
        if let Some(payload) = sub.extract(&message) {
            return Ok(payload);
        }
        tracing::trace!("ignoring websocket message: {}", message);
    }
}

/// Primary shape first, then the fallback shape once.
async fn subscribe(sub: &dyn Subscription, session: &mut Session) -> Result<Value> {
    let stream = session
        .stream
        .as_mut()
        .ok_or_else(|| Error::Transport("websocket session already closed".into()))?;
    match request_ack(stream, sub.subscribe_request()).await {
        Ok(id) => Ok(id),
        Err(e) => match sub.fallback_request() {
            Some(fallback) => {
                tracing::warn!("{} rejected ({}), retrying with fallback shape", sub.method(), e);
                request_ack(stream, fallback).await
            }
            None => Err(e),
        },
    }
}

/// Send `request` and wait for the reply carrying its id. A null or absent
/// `result` is a rejection.
async fn request_ack(stream: &mut WsStream, request: Value) -> Result<Value> {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    stream.send(Message::Text(request.to_string().into())).await?;

    let wait = async {
        loop {
            let message = next_json(stream).await?;
            if message.get("id") != Some(&id) {
                continue;
            }
            return match message.get("result") {
                Some(result) if !result.is_null() => Ok(result.clone()),
                _ => Err(Error::Subscription(
                    message.get("error").map(|e| e.to_string()).unwrap_or_else(|| "null result".into()),
                )),
            };
        }
    };
    tokio::time::timeout(HANDSHAKE_TIMEOUT, wait)
        .await
        .map_err(|_| Error::Subscription(format!("no acknowledgement within {HANDSHAKE_TIMEOUT:?}")))?
}

/// Next JSON message; control frames and unparseable payloads are skipped.
async fn next_json(stream: &mut WsStream) -> Result<Value> {
    loop {
        let text = match stream.next().await {
            Some(Ok(Message::Text(t))) => t.as_str().to_string(),
            Some(Ok(Message::Binary(b))) => String::from_utf8_lossy(&b).into_owned(),
            Some(Ok(Message::Close(_))) | None => return Err(Error::Transport("websocket closed by peer".into())),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        };
        match serde_json::from_str(&text) {
            Ok(v) => return Ok(v),
            Err(e) => tracing::debug!("skipping non-JSON websocket frame: {}", e),
        }
    }
}
