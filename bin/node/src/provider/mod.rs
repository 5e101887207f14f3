pub mod actions;
mod health;
pub(crate) mod matcher;
pub mod parse;
mod subscribe;
pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue, USER_AGENT};
use http::HeaderMap;
use strand_config::outbound::{OutboundKind, OutboundOptions, SelectorOutboundOptions};
use strand_config::provider::OutboundProviderOptions;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::{
    BoxError, Outbound, OutboundProvider, ProviderData, SubscribeData, SubscriptionClient,
    SubscriptionRequest, TransportOptions,
};
use crate::provider::actions::{new_action, ActionError, OutboundProcessor, ProviderAction};
use crate::services::NodeServices;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("missing url")]
    MissingUrl,
    #[error("invalid header {name}: {source}")]
    InvalidHeader { name: String, source: http::Error },
    #[error("parse action[{index}]: {source}")]
    ParseAction { index: usize, source: ActionError },
    #[error("apply action[{index}]: {source}")]
    ApplyAction { index: usize, source: ActionError },
    #[error("fetch failed: {source}")]
    FetchFailed { source: BoxError },
    #[error("parse subscription: {source}")]
    ParseSubscription { source: BoxError },
    #[error("parse outbound[{index}]: {source}")]
    ParseOutbound { index: usize, source: BoxError },
    #[error("parse aggregate outbound[{tag}]: {source}")]
    ParseAggregateOutbound { tag: String, source: BoxError },
}

#[derive(Default)]
struct ProviderSnapshot {
    outbounds: Vec<Arc<dyn Outbound>>,
    by_tag: HashMap<String, Arc<dyn Outbound>>,
    basic_len: usize,
}

struct RefreshHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// An outbound provider backed by a remote subscription. The fetched option
/// list runs through the action pipeline, is instantiated into live
/// outbounds, and is topped with an aggregate selector named after the
/// provider itself.
pub struct SubscriptionProvider {
    tag: String,
    cache_tag: String,
    url: String,
    update_interval: Option<Duration>,
    request_timeout: Option<Duration>,
    http3: bool,
    headers: HeaderMap,
    selector_options: SelectorOutboundOptions,
    dependent_outbound: Option<String>,
    actions: Vec<Box<dyn ProviderAction>>,
    services: Arc<NodeServices>,
    client: OnceCell<Arc<dyn SubscriptionClient>>,
    subscribe_data: ArcSwap<SubscribeData>,
    snapshot: ArcSwap<ProviderSnapshot>,
    update_lock: tokio::sync::Mutex<()>,
    refresh: std::sync::Mutex<Option<RefreshHandle>>,
}

impl std::fmt::Debug for SubscriptionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionProvider")
            .field("tag", &self.tag)
            .field("url", &self.url)
            .finish()
    }
}

impl SubscriptionProvider {
    pub fn new(
        services: Arc<NodeServices>,
        options: OutboundProviderOptions,
    ) -> Result<Self, ProviderError> {
        if options.url.is_empty() {
            return Err(ProviderError::MissingUrl);
        }
        let cache_tag = options
            .cache_tag
            .filter(|tag| !tag.is_empty())
            .unwrap_or_else(|| options.tag.clone());

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&subscribe::DEFAULT_USER_AGENT).map_err(|source| {
                ProviderError::InvalidHeader {
                    name: USER_AGENT.to_string(),
                    source: source.into(),
                }
            })?,
        );
        for (name, value) in &options.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|source| {
                ProviderError::InvalidHeader {
                    name: name.clone(),
                    source: source.into(),
                }
            })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|source| ProviderError::InvalidHeader {
                    name: name.clone(),
                    source: source.into(),
                })?;
            headers.insert(header_name, header_value);
        }

        let mut provider_actions = Vec::with_capacity(options.actions.len());
        for (index, blob) in options.actions.iter().enumerate() {
            let action =
                new_action(blob).map_err(|source| ProviderError::ParseAction { index, source })?;
            provider_actions.push(action);
        }

        Ok(Self {
            tag: options.tag,
            cache_tag,
            url: options.url,
            update_interval: options.update_interval.filter(|d| !d.is_zero()),
            request_timeout: options.request_timeout.filter(|d| !d.is_zero()),
            http3: options.http3,
            headers,
            selector_options: options.selector,
            dependent_outbound: options.detour.filter(|tag| !tag.is_empty()),
            actions: provider_actions,
            services,
            client: OnceCell::new(),
            subscribe_data: ArcSwap::from_pointee(SubscribeData::default()),
            snapshot: ArcSwap::from_pointee(ProviderSnapshot::default()),
            update_lock: tokio::sync::Mutex::new(()),
            refresh: std::sync::Mutex::new(None),
        })
    }

    async fn pre_start_inner(&self) -> Result<(), ProviderError> {
        let mut data = self.load_from_cache().await;
        let stale = match self.update_interval {
            Some(interval) => match data.subscribe.update {
                Some(update) => SystemTime::now()
                    .duration_since(update)
                    .map(|age| age > interval)
                    .unwrap_or(false),
                None => true,
            },
            None => false,
        };
        if data.outbounds.is_none() || stale {
            match self.fetch().await {
                Ok(fresh) => {
                    if let Err(err) = self.save_to_cache(&fresh).await {
                        warn!(provider = %self.tag, "save to cache failed: {err}");
                    }
                    data = fresh;
                }
                Err(source) => {
                    if data.outbounds.is_none() {
                        return Err(ProviderError::FetchFailed { source });
                    }
                    warn!(provider = %self.tag, "fetch failed: {source}, using cached data");
                }
            }
        }

        let outbound_options = data.outbounds.take().unwrap_or_default();
        self.subscribe_data.store(Arc::new(data.subscribe));
        let snapshot = self.instantiate(outbound_options)?;
        self.snapshot.store(Arc::new(snapshot));
        Ok(())
    }

    /// Runs the action pipeline and instantiates the surviving options, in
    /// order, followed by the aggregate selector. The user's selector
    /// preamble stays at the head of the member list.
    fn instantiate(
        &self,
        outbound_options: Vec<OutboundOptions>,
    ) -> Result<ProviderSnapshot, ProviderError> {
        let mut processor = OutboundProcessor::new(outbound_options);
        for (index, action) in self.actions.iter().enumerate() {
            action
                .apply(&mut processor)
                .map_err(|source| ProviderError::ApplyAction { index, source })?;
        }
        let basic_len = processor.basic_outbounds().len();
        let outbound_options = processor.build();

        let mut aggregate_options = self.selector_options.clone();
        let mut member_tags =
            Vec::with_capacity(aggregate_options.outbounds.len() + outbound_options.len());
        member_tags.append(&mut aggregate_options.outbounds);
        member_tags.extend(outbound_options.iter().map(|options| options.tag.clone()));
        aggregate_options.outbounds = member_tags;
        let aggregate = OutboundOptions {
            tag: self.tag.clone(),
            kind: OutboundKind::Selector(aggregate_options),
        };

        let mut outbounds = Vec::with_capacity(outbound_options.len() + 1);
        for (index, options) in outbound_options.iter().enumerate() {
            let outbound = self
                .services
                .factory
                .create(options)
                .map_err(|source| ProviderError::ParseOutbound { index, source })?;
            outbounds.push(outbound);
        }
        let aggregate_outbound = self.services.factory.create(&aggregate).map_err(|source| {
            ProviderError::ParseAggregateOutbound {
                tag: self.tag.clone(),
                source,
            }
        })?;
        outbounds.push(aggregate_outbound);

        let by_tag = outbounds
            .iter()
            .map(|outbound| (outbound.tag().to_string(), outbound.clone()))
            .collect();
        Ok(ProviderSnapshot {
            outbounds,
            by_tag,
            basic_len,
        })
    }

    async fn fetch(&self) -> Result<ProviderData, BoxError> {
        let client = self
            .client
            .get_or_try_init(|| async {
                self.services.transport.create(&TransportOptions {
                    http3: self.http3,
                    detour: self.dependent_outbound.clone(),
                })
            })
            .await?;

        let response = client
            .fetch(SubscriptionRequest {
                url: self.url.clone(),
                headers: self.headers.clone(),
                timeout: self.request_timeout,
            })
            .await?;

        let outbounds = self
            .services
            .parser
            .parse(&response.body)
            .map_err(|source| ProviderError::ParseSubscription { source })?;

        let mut data = ProviderData {
            outbounds: Some(outbounds),
            subscribe: SubscribeData {
                update: Some(SystemTime::now()),
                ..SubscribeData::default()
            },
        };
        if let Some(header) = response
            .headers
            .get("subscription-userinfo")
            .and_then(|value| value.to_str().ok())
        {
            subscribe::apply_subscription_userinfo(&mut data.subscribe, header);
        }
        Ok(data)
    }

    async fn load_from_cache(&self) -> ProviderData {
        let Some(cache) = &self.services.cache else {
            return ProviderData::default();
        };
        match cache.load(&self.cache_tag).await {
            Ok(Some(data)) => data,
            Ok(None) => ProviderData::default(),
            Err(err) => {
                warn!(provider = %self.tag, "load from cache failed: {err}");
                ProviderData::default()
            }
        }
    }

    async fn save_to_cache(&self, data: &ProviderData) -> Result<(), BoxError> {
        let Some(cache) = &self.services.cache else {
            return Ok(());
        };
        cache.store(&self.cache_tag, data).await
    }

    /// One refresh pass. The outbound set is not rebuilt here; running
    /// outbounds keep serving and only the cache and subscription metadata
    /// pick up the new payload.
    async fn update_once(&self) {
        info!(provider = %self.tag, "updating subscription");
        let data = match self.fetch().await {
            Ok(data) => data,
            Err(err) => {
                error!(provider = %self.tag, "update: fetch failed: {err}");
                return;
            }
        };
        if let Err(err) = self.save_to_cache(&data).await {
            error!(provider = %self.tag, "update: save to cache failed: {err}");
            return;
        }
        self.subscribe_data.store(Arc::new(data.subscribe));
        info!(provider = %self.tag, "update done");
    }

    async fn refresh_loop(&self, interval: Duration, token: CancellationToken) {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(provider = %self.tag, "refresh loop shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    match self.update_lock.try_lock() {
                        Ok(_guard) => self.update_once().await,
                        Err(_) => {
                            debug!(provider = %self.tag, "update already running, skipping tick");
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl OutboundProvider for SubscriptionProvider {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn dependent_outbound(&self) -> Option<&str> {
        self.dependent_outbound.as_deref()
    }

    async fn pre_start(&self) -> Result<(), BoxError> {
        self.pre_start_inner().await.map_err(Into::into)
    }

    async fn start(self: Arc<Self>) -> Result<(), BoxError> {
        let Some(interval) = self.update_interval else {
            return Ok(());
        };
        let token = CancellationToken::new();
        let child = token.clone();
        let provider = self.clone();
        let handle = tokio::spawn(async move {
            provider.refresh_loop(interval, child).await;
        });
        if let Ok(mut slot) = self.refresh.lock() {
            *slot = Some(RefreshHandle { token, handle });
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        let refresh = self.refresh.lock().ok().and_then(|mut slot| slot.take());
        if let Some(RefreshHandle { token, handle }) = refresh {
            token.cancel();
            // Joining the task is the close acknowledgement.
            let _ = handle.await;
        }
        Ok(())
    }

    fn outbounds(&self) -> Vec<Arc<dyn Outbound>> {
        self.snapshot.load().outbounds.clone()
    }

    fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        self.snapshot.load().by_tag.get(tag).cloned()
    }

    fn basic_outbounds(&self) -> Vec<Arc<dyn Outbound>> {
        let snapshot = self.snapshot.load();
        snapshot.outbounds[..snapshot.basic_len].to_vec()
    }

    fn update(self: Arc<Self>) {
        tokio::spawn(async move {
            match self.update_lock.try_lock() {
                Ok(_guard) => self.update_once().await,
                Err(_) => debug!(provider = %self.tag, "update already running, request dropped"),
            }
        });
    }

    async fn health_check(&self) {
        health::health_check(self).await;
    }

    fn subscribe_data(&self) -> SubscribeData {
        (**self.subscribe_data.load()).clone()
    }
}
