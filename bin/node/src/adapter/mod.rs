pub mod matcher;

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use dashmap::DashMap;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use strand_config::outbound::OutboundOptions;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A configured upstream endpoint or logical group.
pub trait Outbound: Send + Sync {
    fn tag(&self) -> &str;
    fn outbound_type(&self) -> &str;

    /// Tags of outbounds that must be started before this one.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Present when the outbound carries a lifecycle; absent on stateless
    /// outbounds, which are considered started as soon as they exist.
    fn as_starter(&self) -> Option<&dyn Starter> {
        None
    }

    /// Present on selector/url-test groups.
    fn as_group(&self) -> Option<&dyn OutboundGroup> {
        None
    }
}

impl std::fmt::Debug for dyn Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("tag", &self.tag())
            .field("outbound_type", &self.outbound_type())
            .finish()
    }
}

/// Lifecycle capability of an outbound.
#[async_trait]
pub trait Starter: Send + Sync {
    async fn start(&self) -> Result<(), BoxError>;

    async fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

pub trait OutboundGroup: Send + Sync {
    /// Tag of the member the group currently serves.
    fn now(&self) -> String;
}

/// A source of outbounds fetched from a remote subscription.
#[async_trait]
pub trait OutboundProvider: Send + Sync {
    fn tag(&self) -> &str;

    /// Tag of the outbound the subscription request is routed through, if any.
    /// The startup coordinator orders that outbound before the provider.
    fn dependent_outbound(&self) -> Option<&str>;

    /// Fetches (or loads from cache) and materializes the outbound set.
    async fn pre_start(&self) -> Result<(), BoxError>;

    /// Spawns the periodic refresh loop, when one is configured.
    async fn start(self: Arc<Self>) -> Result<(), BoxError>;

    /// Stops the refresh loop and waits for it to acknowledge.
    async fn close(&self) -> Result<(), BoxError>;

    /// The live snapshot: subscription outbounds, then group outbounds, then
    /// the aggregate selector. Callers must not mutate the returned objects.
    fn outbounds(&self) -> Vec<Arc<dyn Outbound>>;

    fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>>;

    /// Only the subscription-sourced outbounds, excluding group outbounds
    /// and the aggregate selector.
    fn basic_outbounds(&self) -> Vec<Arc<dyn Outbound>>;

    /// Requests an out-of-schedule refresh. Collapses into at most one
    /// in-flight refresh; extra requests are dropped.
    fn update(self: Arc<Self>);

    async fn health_check(&self);

    fn subscribe_data(&self) -> SubscribeData;
}

/// Subscription metadata advertised by the remote endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscribeData {
    pub upload: u64,
    pub download: u64,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire: Option<SystemTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<SystemTime>,
}

/// The payload a provider persists through the cache bridge. `outbounds`
/// stays `None` when no payload has ever been fetched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbounds: Option<Vec<OutboundOptions>>,
    #[serde(default)]
    pub subscribe: SubscribeData,
}

/// Key-value store for provider payloads, keyed by cache tag.
#[async_trait]
pub trait ProviderCacheStore: Send + Sync {
    async fn load(&self, cache_tag: &str) -> Result<Option<ProviderData>, BoxError>;
    async fn store(&self, cache_tag: &str, data: &ProviderData) -> Result<(), BoxError>;
}

/// Turns a raw subscription payload into outbound options. Implementations
/// detect the payload variant (JSON, Clash YAML, raw link list).
pub trait SubscriptionParser: Send + Sync {
    fn parse(&self, body: &[u8]) -> Result<Vec<OutboundOptions>, BoxError>;
}

/// Builds live outbounds from parsed options.
pub trait OutboundFactory: Send + Sync {
    fn create(&self, options: &OutboundOptions) -> Result<Arc<dyn Outbound>, BoxError>;
}

pub struct SubscriptionRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
}

pub struct SubscriptionResponse {
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// One HTTP client dedicated to a provider's subscription endpoint.
#[async_trait]
pub trait SubscriptionClient: Send + Sync {
    async fn fetch(&self, request: SubscriptionRequest) -> Result<SubscriptionResponse, BoxError>;
}

impl std::fmt::Debug for dyn SubscriptionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SubscriptionClient")
    }
}

pub struct TransportOptions {
    pub http3: bool,
    pub detour: Option<String>,
}

/// Builds subscription clients on top of the configured dialer.
pub trait TransportFactory: Send + Sync {
    fn create(&self, options: &TransportOptions) -> Result<Arc<dyn SubscriptionClient>, BoxError>;
}

/// Measures reachability through an outbound against the default probe URL.
/// Returns the observed delay in milliseconds.
#[async_trait]
pub trait LatencyTester: Send + Sync {
    async fn url_test(&self, outbound: Arc<dyn Outbound>) -> Result<u16, BoxError>;
}

/// Shared registry of started outbounds and registered providers. The
/// startup coordinator fills it; groups resolve their members from it when
/// they start.
#[derive(Default)]
pub struct OutboundManager {
    outbounds: DashMap<String, Arc<dyn Outbound>>,
    providers: DashMap<String, Arc<dyn OutboundProvider>>,
}

impl OutboundManager {
    pub fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        self.outbounds.get(tag).map(|entry| entry.value().clone())
    }

    pub fn insert_outbound(&self, outbound: Arc<dyn Outbound>) {
        self.outbounds.insert(outbound.tag().to_string(), outbound);
    }

    pub fn provider(&self, tag: &str) -> Option<Arc<dyn OutboundProvider>> {
        self.providers.get(tag).map(|entry| entry.value().clone())
    }

    pub fn insert_provider(&self, provider: Arc<dyn OutboundProvider>) {
        self.providers.insert(provider.tag().to_string(), provider);
    }
}
