//! Probe lifecycle shared by every transport.
//!
//! A probe is built once per invocation from a [`ProbeContext`], collects
//! exactly once under its own deadline, and is read once for formatting.
//! Success and failure both end in one `response_status` label write.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::labels::{LabelKey, LabelSet};
use crate::metric::{ProbeMetric, RESPONSE_TIME};
use crate::state::ReferenceState;
use crate::timing::{HttpTimer, RetryPolicy};

/// Resolved transport targets for one provider. Shared read-only by every
/// probe built for that provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointConfig {
    pub main_endpoint: String,
    pub ws_endpoint: Option<String>,
    pub tx_endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    /// Deadline for one collection.
    pub timeout: Duration,
    /// Successful readings above this are recorded as failures.
    pub max_latency: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(55), max_latency: Duration::from_secs(55) }
    }
}

/// Everything a probe constructor needs, passed once.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    pub endpoints: Arc<EndpointConfig>,
    pub source_region: String,
    pub target_region: String,
    pub chain: String,
    pub provider: String,
    pub state: Arc<ReferenceState>,
    pub settings: ProbeSettings,
}

impl ProbeContext {
    pub fn labels(&self) -> LabelSet {
        LabelSet::seeded(&self.source_region, &self.target_region, &self.chain, &self.provider)
    }
}

#[async_trait]
pub trait Probe: Send {
    fn metric(&self) -> &ProbeMetric;

    fn metric_mut(&mut self) -> &mut ProbeMetric;

    /// Run once. Never fails outward; the outcome lands on the metric.
    async fn collect(&mut self);
}

/// One request shape against an HTTP endpoint.
pub trait RpcMethod: Send + Sync {
    /// Method name, also used as the `api_method` label.
    fn name(&self) -> &str;

    /// Whether the reference state carries what [`RpcMethod::params`] needs.
    fn validate(&self, _state: &ReferenceState) -> bool {
        true
    }

    /// `params` member; `Null` or an empty array/object omits it.
    fn params(&self, _state: &ReferenceState) -> Result<Value> {
        Ok(Value::Null)
    }

    fn build_request(&self, state: &ReferenceState) -> Result<Value> {
        let mut request = json!({"id": 1, "jsonrpc": "2.0", "method": self.name()});
        let params = self.params(state)?;
        if !is_blank(&params) {
            request["params"] = params;
        }
        Ok(request)
    }

    /// URL to call, derived from the provider's main endpoint.
    fn endpoint(&self, base: &str) -> String {
        base.to_string()
    }
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Run `fut` under `timeout`, mapping expiry to [`Error::Timeout`].
pub(crate) async fn with_deadline<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(out) => out,
        Err(_) => Err(Error::Timeout(timeout)),
    }
}

/// Apply a collection outcome. The first value is the headline latency and
/// is checked against the ceiling; nothing is written before the outcome is
/// known, so a failed probe never carries a stale reading.
pub(crate) fn settle(metric: &mut ProbeMetric, settings: &ProbeSettings, outcome: Result<Vec<(String, f64)>>) {
    let outcome = outcome.and_then(|values| match values.first() {
        Some((_, latency)) if *latency > settings.max_latency.as_secs_f64() => {
            Err(Error::LatencyCeiling { latency: *latency, ceiling: settings.max_latency })
        }
        Some(_) => Ok(values),
        None => Err(Error::Malformed("no data in response".into())),
    });

    match outcome {
        Ok(values) => {
            for (value_type, value) in values {
                metric.set_value(&value_type, value, None);
            }
            metric.mark_success();
        }
        Err(e) => {
            metric.mark_failure();
            metric.record_error(&e);
        }
    }
}

/// Latency of one JSON-RPC (or JSON-over-HTTP) call, excluding connection setup.
pub struct RpcProbe {
    metric: ProbeMetric,
    method: Arc<dyn RpcMethod>,
    request: Value,
    url: String,
    settings: ProbeSettings,
    timer: HttpTimer,
}

impl RpcProbe {
    /// Fails with [`Error::Validation`] when the reference state cannot
    /// support this method; such a probe never runs.
    pub fn new(metric_name: &str, method: Arc<dyn RpcMethod>, ctx: &ProbeContext) -> Result<Self> {
        if !method.validate(&ctx.state) {
            return Err(Error::validation(method.name(), "reference state lacks required identifiers"));
        }
        if ctx.endpoints.main_endpoint.is_empty() {
            return Err(Error::Configuration(format!("{}: no http endpoint for {}", method.name(), ctx.provider)));
        }
        let request = method.build_request(&ctx.state)?;
        let url = method.endpoint(&ctx.endpoints.main_endpoint);

        let mut labels = ctx.labels();
        labels.update(LabelKey::ApiMethod, method.name());

        Ok(Self {
            metric: ProbeMetric::new(metric_name, labels),
            method,
            request,
            url,
            settings: ctx.settings,
            timer: HttpTimer::new(RetryPolicy::default())?,
        })
    }

    pub fn request(&self) -> &Value {
        &self.request
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Probe for RpcProbe {
    fn metric(&self) -> &ProbeMetric {
        &self.metric
    }

    fn metric_mut(&mut self) -> &mut ProbeMetric {
        &mut self.metric
    }

    async fn collect(&mut self) {
        tracing::debug!("{} -> {}", self.method.name(), self.url);
        let outcome = with_deadline(self.settings.timeout, self.timer.json_rpc(&self.url, &self.request))
            .await
            .map(|(latency, _)| vec![(RESPONSE_TIME.to_string(), latency)]);
        settle(&mut self.metric, &self.settings, outcome);
    }
}
