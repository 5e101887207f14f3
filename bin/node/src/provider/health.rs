use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use futures::{stream, StreamExt};
use strand_config::outbound::{TYPE_SELECTOR, TYPE_URLTEST};
use tracing::{debug, warn};

use crate::adapter::Outbound;
use crate::history::UrlTestHistory;
use crate::provider::{ProviderSnapshot, SubscriptionProvider};

const HEALTH_CHECK_CONCURRENCY: usize = 10;
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Probes every non-group outbound of the provider with bounded
/// parallelism, stores the measured delays, and then copies each group's
/// underlying delay onto the group tag itself.
pub(super) async fn health_check(provider: &SubscriptionProvider) {
    let Some(history) = provider.services.history.clone() else {
        return;
    };
    let Some(latency) = provider.services.latency.clone() else {
        return;
    };
    let snapshot = provider.snapshot.load_full();

    let delays: Mutex<HashMap<String, u16>> = Mutex::new(HashMap::new());
    let probes = stream::iter(
        snapshot
            .outbounds
            .iter()
            .filter(|outbound| !is_group_type(outbound.outbound_type()))
            .cloned(),
    )
    .for_each_concurrent(Some(HEALTH_CHECK_CONCURRENCY), |outbound| {
        let latency = latency.clone();
        let history = history.clone();
        let delays = &delays;
        async move {
            let tag = outbound.tag().to_string();
            match latency.url_test(outbound).await {
                Ok(delay) => {
                    history.store(
                        tag.clone(),
                        UrlTestHistory {
                            time: SystemTime::now(),
                            delay,
                        },
                    );
                    if let Ok(mut delays) = delays.lock() {
                        delays.insert(tag, delay);
                    }
                }
                Err(err) => {
                    debug!("url test failed for [{tag}]: {err}");
                    history.delete(&tag);
                }
            }
        }
    });
    if tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probes).await.is_err() {
        warn!(provider = %provider.tag, "health check timed out");
    }
    let delays = delays.into_inner().unwrap_or_default();

    for outbound in &snapshot.outbounds {
        if !is_group_type(outbound.outbound_type()) {
            continue;
        }
        let real = real_tag(&snapshot, outbound);
        if let Some(delay) = delays.get(&real) {
            history.store(
                outbound.tag().to_string(),
                UrlTestHistory {
                    time: SystemTime::now(),
                    delay: *delay,
                },
            );
        }
    }
}

fn is_group_type(outbound_type: &str) -> bool {
    outbound_type == TYPE_SELECTOR || outbound_type == TYPE_URLTEST
}

/// Follows `now()` through nested groups until a concrete member tag comes
/// out. The hop limit breaks selector reference loops.
fn real_tag(snapshot: &ProviderSnapshot, outbound: &Arc<dyn Outbound>) -> String {
    let mut current = outbound.clone();
    for _ in 0..8 {
        let Some(group) = current.as_group() else {
            return current.tag().to_string();
        };
        let next_tag = group.now();
        match snapshot.by_tag.get(&next_tag) {
            Some(next) => current = next.clone(),
            None => return next_tag,
        }
    }
    current.tag().to_string()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::adapter::{BoxError, LatencyTester, OutboundGroup};
    use crate::services::NodeServices;
    use strand_config::provider::OutboundProviderOptions;

    struct FakeEndpoint {
        tag: String,
    }

    impl Outbound for FakeEndpoint {
        fn tag(&self) -> &str {
            &self.tag
        }

        fn outbound_type(&self) -> &str {
            "shadowsocks"
        }
    }

    struct FakeGroup {
        tag: String,
        member: String,
    }

    impl Outbound for FakeGroup {
        fn tag(&self) -> &str {
            &self.tag
        }

        fn outbound_type(&self) -> &str {
            TYPE_SELECTOR
        }

        fn as_group(&self) -> Option<&dyn OutboundGroup> {
            Some(self)
        }
    }

    impl OutboundGroup for FakeGroup {
        fn now(&self) -> String {
            self.member.clone()
        }
    }

    struct ScriptedTester {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedTester {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LatencyTester for ScriptedTester {
        async fn url_test(&self, outbound: Arc<dyn Outbound>) -> Result<u16, BoxError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match outbound.tag() {
                tag if tag.starts_with("dead-") => Err("probe refused".into()),
                "hk-01" => Ok(30),
                "hk-02" => Ok(80),
                _ => Ok(120),
            }
        }
    }

    fn provider_with_snapshot(
        services: Arc<NodeServices>,
        outbounds: Vec<Arc<dyn Outbound>>,
    ) -> SubscriptionProvider {
        let provider = SubscriptionProvider::new(
            services,
            OutboundProviderOptions {
                tag: "airport".to_string(),
                url: "https://example.com/subscription".to_string(),
                ..OutboundProviderOptions::default()
            },
        )
        .unwrap();
        let by_tag = outbounds
            .iter()
            .map(|o| (o.tag().to_string(), o.clone()))
            .collect();
        let basic_len = outbounds
            .iter()
            .filter(|o| !is_group_type(o.outbound_type()))
            .count();
        provider.snapshot.store(Arc::new(ProviderSnapshot {
            outbounds,
            by_tag,
            basic_len,
        }));
        provider
    }

    #[tokio::test]
    async fn probes_endpoints_and_delegates_to_groups() {
        let tester = Arc::new(ScriptedTester::new());
        let mut services = NodeServices::for_tests();
        services.latency = Some(tester.clone());
        let services = Arc::new(services);
        let history = services.history.clone().unwrap();

        let outbounds: Vec<Arc<dyn Outbound>> = vec![
            Arc::new(FakeEndpoint {
                tag: "hk-01".to_string(),
            }),
            Arc::new(FakeEndpoint {
                tag: "hk-02".to_string(),
            }),
            Arc::new(FakeEndpoint {
                tag: "dead-01".to_string(),
            }),
            Arc::new(FakeGroup {
                tag: "airport".to_string(),
                member: "hk-01".to_string(),
            }),
        ];
        let provider = provider_with_snapshot(services, outbounds);

        // A stale entry for a now-dead endpoint must be dropped.
        history.store(
            "dead-01".to_string(),
            UrlTestHistory {
                time: SystemTime::now(),
                delay: 999,
            },
        );

        health_check(&provider).await;

        assert_eq!(history.load("hk-01").map(|h| h.delay), Some(30));
        assert_eq!(history.load("hk-02").map(|h| h.delay), Some(80));
        assert!(history.load("dead-01").is_none());
        // The group inherits the delay of its underlying member.
        assert_eq!(history.load("airport").map(|h| h.delay), Some(30));
        assert!(tester.max_in_flight.load(Ordering::SeqCst) <= HEALTH_CHECK_CONCURRENCY);
    }

    #[tokio::test]
    async fn missing_history_storage_is_a_noop() {
        let tester = Arc::new(ScriptedTester::new());
        let mut services = NodeServices::for_tests();
        services.history = None;
        services.latency = Some(tester.clone());
        let provider = provider_with_snapshot(
            Arc::new(services),
            vec![Arc::new(FakeEndpoint {
                tag: "hk-01".to_string(),
            })],
        );

        health_check(&provider).await;

        assert_eq!(tester.max_in_flight.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn nested_groups_resolve_to_the_leaf_member() {
        let outbounds: Vec<Arc<dyn Outbound>> = vec![
            Arc::new(FakeEndpoint {
                tag: "hk-01".to_string(),
            }),
            Arc::new(FakeGroup {
                tag: "inner".to_string(),
                member: "hk-01".to_string(),
            }),
            Arc::new(FakeGroup {
                tag: "outer".to_string(),
                member: "inner".to_string(),
            }),
        ];
        let by_tag = outbounds
            .iter()
            .map(|o| (o.tag().to_string(), o.clone()))
            .collect();
        let snapshot = ProviderSnapshot {
            outbounds: outbounds.clone(),
            by_tag,
            basic_len: 1,
        };
        assert_eq!(real_tag(&snapshot, &outbounds[2]), "hk-01");
    }
}
