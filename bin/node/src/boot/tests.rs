use std::sync::Mutex;

use async_trait::async_trait;

use super::*;
use crate::adapter::{Starter, SubscribeData};

type EventLog = Arc<Mutex<Vec<String>>>;

struct TrackingOutbound {
    tag: String,
    outbound_type: &'static str,
    dependencies: Vec<String>,
    starter: bool,
    fail: bool,
    log: EventLog,
}

impl TrackingOutbound {
    fn starter(
        tag: &str,
        outbound_type: &'static str,
        deps: &[&str],
        log: &EventLog,
    ) -> Arc<dyn Outbound> {
        Arc::new(Self {
            tag: tag.to_string(),
            outbound_type,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            starter: true,
            fail: false,
            log: log.clone(),
        })
    }

    fn stateless(tag: &str, log: &EventLog) -> Arc<dyn Outbound> {
        Arc::new(Self {
            tag: tag.to_string(),
            outbound_type: "direct",
            dependencies: Vec::new(),
            starter: false,
            fail: false,
            log: log.clone(),
        })
    }

    fn failing(tag: &str, log: &EventLog) -> Arc<dyn Outbound> {
        Arc::new(Self {
            tag: tag.to_string(),
            outbound_type: "shadowsocks",
            dependencies: Vec::new(),
            starter: true,
            fail: true,
            log: log.clone(),
        })
    }
}

impl Outbound for TrackingOutbound {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn outbound_type(&self) -> &str {
        self.outbound_type
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    fn as_starter(&self) -> Option<&dyn Starter> {
        self.starter.then_some(self as &dyn Starter)
    }
}

#[async_trait]
impl Starter for TrackingOutbound {
    async fn start(&self) -> Result<(), BoxError> {
        if self.fail {
            return Err("bind refused".into());
        }
        self.log.lock().unwrap().push(format!("start:{}", self.tag));
        Ok(())
    }
}

struct TrackingProvider {
    tag: String,
    dependent: Option<String>,
    produced: Vec<Arc<dyn Outbound>>,
    log: EventLog,
}

impl TrackingProvider {
    fn new(
        tag: &str,
        dependent: Option<&str>,
        produced: Vec<Arc<dyn Outbound>>,
        log: &EventLog,
    ) -> Arc<dyn OutboundProvider> {
        Arc::new(Self {
            tag: tag.to_string(),
            dependent: dependent.map(|d| d.to_string()),
            produced,
            log: log.clone(),
        })
    }
}

#[async_trait]
impl OutboundProvider for TrackingProvider {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn dependent_outbound(&self) -> Option<&str> {
        self.dependent.as_deref()
    }

    async fn pre_start(&self) -> Result<(), BoxError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("prestart:{}", self.tag));
        Ok(())
    }

    async fn start(self: Arc<Self>) -> Result<(), BoxError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }

    fn outbounds(&self) -> Vec<Arc<dyn Outbound>> {
        self.produced.clone()
    }

    fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        self.produced.iter().find(|o| o.tag() == tag).cloned()
    }

    fn basic_outbounds(&self) -> Vec<Arc<dyn Outbound>> {
        self.produced.clone()
    }

    fn update(self: Arc<Self>) {}

    async fn health_check(&self) {}

    fn subscribe_data(&self) -> SubscribeData {
        SubscribeData::default()
    }
}

fn log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[tokio::test]
async fn starts_dependencies_before_dependents() {
    let log = log();
    let a = TrackingOutbound::starter("A", "shadowsocks", &[], &log);
    let b = TrackingOutbound::starter("B", "selector", &["A"], &log);
    let manager = OutboundManager::default();

    // Declaration order must not matter.
    let started = start_outbounds(&[b, a], &[], &manager).await.unwrap();

    assert_eq!(events(&log), vec!["start:A", "start:B"]);
    assert_eq!(started.len(), 2);
    assert!(started.contains_key("A") && started.contains_key("B"));
    assert!(manager.outbound("B").is_some());
}

#[tokio::test]
async fn missing_dependency_is_reported_by_tag() {
    let log = log();
    let b = TrackingOutbound::starter("B", "selector", &["A"], &log);
    let manager = OutboundManager::default();

    let err = start_outbounds(&[b], &[], &manager).await.unwrap_err();

    match err {
        StartupError::OutboundNotFound(tag) => assert_eq!(tag, "A"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(events(&log).is_empty());
}

#[tokio::test]
async fn cycles_render_a_witness_path() {
    let log = log();
    let a = TrackingOutbound::starter("A", "selector", &["B"], &log);
    let b = TrackingOutbound::starter("B", "selector", &["A"], &log);
    let manager = OutboundManager::default();

    let err = start_outbounds(&[a, b], &[], &manager).await.unwrap_err();

    match err {
        StartupError::CircularDependency(path) => {
            assert_eq!(path, "outbound[A] -> outbound[B] -> outbound[A]");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(events(&log).is_empty());
}

#[tokio::test]
async fn provider_outbounds_join_the_graph() {
    let log = log();
    let a = TrackingOutbound::starter("A", "shadowsocks", &[], &log);
    let c = TrackingOutbound::starter("C", "vmess", &["A"], &log);
    let aggregate = TrackingOutbound::starter("P", "selector", &["C"], &log);
    let provider = TrackingProvider::new("P", None, vec![c, aggregate], &log);
    let manager = OutboundManager::default();

    let started = start_outbounds(&[a], &[provider], &manager)
        .await
        .unwrap();

    assert_eq!(
        events(&log),
        vec!["start:A", "prestart:P", "start:C", "start:P"]
    );
    let mut tags: Vec<_> = started.keys().cloned().collect();
    tags.sort();
    assert_eq!(tags, vec!["A", "C", "P"]);
    assert!(manager.provider("P").is_some());
}

#[tokio::test]
async fn provider_waits_for_its_dependent_outbound() {
    let log = log();
    let detour = TrackingOutbound::starter("detour", "shadowsocks", &[], &log);
    let provider = TrackingProvider::new("P", Some("detour"), vec![], &log);
    let manager = OutboundManager::default();

    start_outbounds(&[detour], &[provider], &manager)
        .await
        .unwrap();

    assert_eq!(events(&log), vec!["start:detour", "prestart:P"]);
}

#[tokio::test]
async fn stateless_outbounds_are_started_immediately() {
    let log = log();
    let direct = TrackingOutbound::stateless("direct-out", &log);
    let b = TrackingOutbound::starter("B", "selector", &["direct-out"], &log);
    let manager = OutboundManager::default();

    let started = start_outbounds(&[direct, b], &[], &manager).await.unwrap();

    assert_eq!(events(&log), vec!["start:B"]);
    assert!(started.contains_key("direct-out"));
}

#[tokio::test]
async fn duplicate_outbound_tags_are_rejected() {
    let log = log();
    let first = TrackingOutbound::starter("A", "shadowsocks", &[], &log);
    let second = TrackingOutbound::starter("A", "vmess", &[], &log);
    let manager = OutboundManager::default();

    let err = start_outbounds(&[first, second], &[], &manager)
        .await
        .unwrap_err();

    match err {
        StartupError::DuplicateOutbound { outbound_type, tag } => {
            assert_eq!(outbound_type, "vmess");
            assert_eq!(tag, "A");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn duplicate_provider_tags_are_rejected() {
    let log = log();
    let first = TrackingProvider::new("P", None, vec![], &log);
    let second = TrackingProvider::new("P", None, vec![], &log);
    let manager = OutboundManager::default();

    let err = start_outbounds(&[], &[first, second], &manager)
        .await
        .unwrap_err();

    assert!(matches!(err, StartupError::DuplicateProvider(tag) if tag == "P"));
}

#[tokio::test]
async fn provider_produced_duplicate_is_rejected() {
    let log = log();
    let a = TrackingOutbound::stateless("A", &log);
    let clash = TrackingOutbound::stateless("A", &log);
    let provider = TrackingProvider::new("P", None, vec![clash], &log);
    let manager = OutboundManager::default();

    let err = start_outbounds(&[a], &[provider], &manager)
        .await
        .unwrap_err();

    assert!(matches!(err, StartupError::DuplicateOutbound { tag, .. } if tag == "A"));
}

#[tokio::test]
async fn start_failures_name_the_outbound() {
    let log = log();
    let broken = TrackingOutbound::failing("broken", &log);
    let manager = OutboundManager::default();

    let err = start_outbounds(&[broken], &[], &manager).await.unwrap_err();

    match err {
        StartupError::InitializeOutbound {
            outbound_type,
            tag,
            source,
        } => {
            assert_eq!(outbound_type, "shadowsocks");
            assert_eq!(tag, "broken");
            assert_eq!(source.to_string(), "bind refused");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn forward_references_materialize_ghost_nodes() {
    let log = log();
    // B is declared first and references A, which only appears later.
    let b = TrackingOutbound::starter("B", "selector", &["A"], &log);
    let a = TrackingOutbound::starter("A", "shadowsocks", &[], &log);
    let manager = OutboundManager::default();

    start_outbounds(&[b, a], &[], &manager).await.unwrap();

    assert_eq!(events(&log), vec!["start:A", "start:B"]);
}
