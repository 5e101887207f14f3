use std::collections::HashMap;
use std::sync::Arc;

use strand_config::StrandConfig;
use tracing::{info, warn};

use crate::adapter::{
    Outbound, OutboundManager, OutboundProvider, ProviderCacheStore,
};
use crate::boot;
use crate::cache::FileCacheStore;
use crate::error::NodeInitError;
use crate::history::UrlTestHistoryStorage;
use crate::outbound::OutboundRegistry;
use crate::provider::parse::JsonSubscriptionParser;
use crate::provider::transport::DefaultTransportFactory;
use crate::provider::SubscriptionProvider;
use crate::services::NodeServices;

/// Owns the configured outbounds and providers and drives their lifecycle:
/// dependency-ordered startup, provider refresh loops, orderly shutdown.
pub struct Node {
    manager: Arc<OutboundManager>,
    outbounds: Vec<Arc<dyn Outbound>>,
    providers: Vec<Arc<dyn OutboundProvider>>,
    started: HashMap<String, Arc<dyn Outbound>>,
}

impl Node {
    pub fn new(config: StrandConfig) -> Result<Self, NodeInitError> {
        let manager = Arc::new(OutboundManager::default());
        let history = Arc::new(UrlTestHistoryStorage::default());
        let factory = Arc::new(OutboundRegistry::new(manager.clone(), history.clone()));
        let cache: Option<Arc<dyn ProviderCacheStore>> = if config.cache.enabled {
            Some(Arc::new(FileCacheStore::new(&config.cache.directory)))
        } else {
            None
        };
        let services = Arc::new(NodeServices {
            cache,
            history: Some(history),
            parser: Arc::new(JsonSubscriptionParser),
            transport: Arc::new(DefaultTransportFactory),
            latency: None,
            factory,
        });

        let mut outbounds: Vec<Arc<dyn Outbound>> = Vec::with_capacity(config.outbounds.len());
        for options in &config.outbounds {
            let outbound = services.factory.create(options).map_err(|source| {
                NodeInitError::BuildOutbound {
                    tag: options.tag.clone(),
                    source,
                }
            })?;
            outbounds.push(outbound);
        }

        let mut providers: Vec<Arc<dyn OutboundProvider>> =
            Vec::with_capacity(config.outbound_providers.len());
        for options in config.outbound_providers {
            let tag = options.tag.clone();
            let provider = SubscriptionProvider::new(services.clone(), options)
                .map_err(|source| NodeInitError::BuildProvider { tag, source })?;
            providers.push(Arc::new(provider));
        }

        Ok(Self {
            manager,
            outbounds,
            providers,
            started: HashMap::new(),
        })
    }

    pub fn manager(&self) -> &Arc<OutboundManager> {
        &self.manager
    }

    /// Starts everything in dependency order, then brings the provider
    /// refresh loops up.
    pub async fn start(&mut self) -> Result<(), NodeInitError> {
        self.started =
            boot::start_outbounds(&self.outbounds, &self.providers, &self.manager).await?;
        for provider in &self.providers {
            provider
                .clone()
                .start()
                .await
                .map_err(|source| NodeInitError::StartProvider {
                    tag: provider.tag().to_string(),
                    source,
                })?;
        }
        info!(
            "started {} outbounds and {} providers",
            self.started.len(),
            self.providers.len()
        );
        Ok(())
    }

    /// Shuts down providers first so no refresh writes race the teardown,
    /// then closes every started outbound.
    pub async fn close(&mut self) {
        for provider in &self.providers {
            if let Err(err) = provider.close().await {
                warn!("close outbound-provider [{}]: {err}", provider.tag());
            }
        }
        for (tag, outbound) in self.started.drain() {
            if let Some(starter) = outbound.as_starter() {
                if let Err(err) = starter.close().await {
                    warn!("close outbound [{tag}]: {err}");
                }
            }
        }
    }
}
