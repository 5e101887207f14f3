use std::sync::Arc;

use crate::adapter::{
    LatencyTester, OutboundFactory, ProviderCacheStore, SubscriptionParser, TransportFactory,
};
use crate::history::UrlTestHistoryStorage;

/// Ambient collaborators the outbound subsystem resolves at runtime. Every
/// provider holds one of these. An absent optional entry switches its
/// feature off instead of failing startup.
pub struct NodeServices {
    /// Cache bridge for provider payloads. Absent when caching is disabled.
    pub cache: Option<Arc<dyn ProviderCacheStore>>,
    /// URL-test history store shared with the url-test groups.
    pub history: Option<Arc<UrlTestHistoryStorage>>,
    /// Subscription payload parser.
    pub parser: Arc<dyn SubscriptionParser>,
    /// Builds the per-provider subscription HTTP clients.
    pub transport: Arc<dyn TransportFactory>,
    /// Latency probe implementation; absent until a dialer is wired in,
    /// which turns health checks into no-ops.
    pub latency: Option<Arc<dyn LatencyTester>>,
    /// Builds live outbounds from parsed options.
    pub factory: Arc<dyn OutboundFactory>,
}

#[cfg(test)]
impl NodeServices {
    /// Services wired entirely from the built-in implementations, with a
    /// fresh manager and history store.
    pub(crate) fn for_tests() -> Self {
        use crate::adapter::OutboundManager;
        use crate::outbound::OutboundRegistry;
        use crate::provider::parse::JsonSubscriptionParser;
        use crate::provider::transport::DefaultTransportFactory;

        let history = Arc::new(UrlTestHistoryStorage::default());
        let manager = Arc::new(OutboundManager::default());
        Self {
            cache: None,
            history: Some(history.clone()),
            parser: Arc::new(JsonSubscriptionParser),
            transport: Arc::new(DefaultTransportFactory),
            latency: None,
            factory: Arc::new(OutboundRegistry::new(manager, history)),
        }
    }
}
