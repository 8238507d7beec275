pub mod catalog;
pub mod collector;
pub mod error;
pub mod labels;
pub mod landing;
pub mod methods;
pub mod metric;
pub mod probe;
pub mod registry;
pub mod state;
pub mod timing;
pub mod ws_probe;

pub use catalog::{Catalog, LANDING_LATENCY, RESPONSE_LATENCY};
pub use collector::{Collection, Collector, EndpointsDocument, ProviderConfig};
pub use error::{Error, Result};
pub use labels::{LabelKey, LabelSet};
pub use landing::{keypair_from_base58, LandingProbe, LandingSettings};
pub use metric::{MetricValue, ProbeMetric};
pub use probe::{EndpointConfig, Probe, ProbeContext, ProbeSettings, RpcMethod, RpcProbe};
pub use registry::{ProbeKind, Registry, Skipped};
pub use state::{BlobConfig, BlobStore, ReferenceState, StateCache, StateDocument, StateFetcher};
pub use timing::{HttpTimer, RetryPolicy, TimedResponse};
pub use ws_probe::{Subscription, WsProbe};
