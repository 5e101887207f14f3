use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use async_trait::async_trait;
use strand_config::outbound::{UrlTestOutboundOptions, TYPE_URLTEST};

use crate::adapter::matcher::MatcherError;
use crate::adapter::{BoxError, Outbound, OutboundGroup, OutboundManager, Starter};
use crate::history::UrlTestHistoryStorage;
use crate::outbound::{
    compile_provider_rules, group_dependencies, resolve_members, ProviderRule,
};

/// Latency-driven group. Serves the member with the best recorded probe;
/// the configured tolerance keeps the current member when a rival is only
/// marginally faster.
pub struct UrlTestOutbound {
    tag: String,
    options: UrlTestOutboundOptions,
    provider_rules: Vec<ProviderRule>,
    manager: Arc<OutboundManager>,
    history: Arc<UrlTestHistoryStorage>,
    members: ArcSwap<Vec<String>>,
    current: ArcSwapOption<String>,
}

impl UrlTestOutbound {
    pub fn new(
        tag: String,
        options: UrlTestOutboundOptions,
        manager: Arc<OutboundManager>,
        history: Arc<UrlTestHistoryStorage>,
    ) -> Result<Self, MatcherError> {
        let provider_rules = compile_provider_rules(&options.providers)?;
        Ok(Self {
            tag,
            options,
            provider_rules,
            manager,
            history,
            members: ArcSwap::from_pointee(Vec::new()),
            current: ArcSwapOption::empty(),
        })
    }

    pub fn members(&self) -> Vec<String> {
        self.members.load().as_ref().clone()
    }

    fn best_member(&self) -> Option<(String, u16)> {
        let members = self.members.load();
        let mut best: Option<(String, u16)> = None;
        for member in members.iter() {
            let Some(entry) = self.history.load(member) else {
                continue;
            };
            let better = best
                .as_ref()
                .map(|(_, delay)| entry.delay < *delay)
                .unwrap_or(true);
            if better {
                best = Some((member.clone(), entry.delay));
            }
        }
        best
    }
}

impl Outbound for UrlTestOutbound {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn outbound_type(&self) -> &str {
        TYPE_URLTEST
    }

    fn dependencies(&self) -> Vec<String> {
        group_dependencies(&self.options.outbounds, &self.options.providers)
    }

    fn as_starter(&self) -> Option<&dyn Starter> {
        Some(self)
    }

    fn as_group(&self) -> Option<&dyn OutboundGroup> {
        Some(self)
    }
}

#[async_trait]
impl Starter for UrlTestOutbound {
    async fn start(&self) -> Result<(), BoxError> {
        let members = resolve_members(
            &self.tag,
            &self.options.outbounds,
            &self.provider_rules,
            &self.manager,
        )?;
        self.members.store(Arc::new(members));
        Ok(())
    }
}

impl OutboundGroup for UrlTestOutbound {
    fn now(&self) -> String {
        let best = self.best_member();
        if let (Some(current), Some((_, best_delay))) =
            (self.current.load().as_ref(), best.as_ref())
        {
            if let Some(entry) = self.history.load(current) {
                if entry.delay <= best_delay.saturating_add(self.options.tolerance) {
                    return current.as_ref().clone();
                }
            }
        }
        if let Some((member, _)) = best {
            self.current.store(Some(Arc::new(member.clone())));
            return member;
        }
        self.members
            .load()
            .first()
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::history::UrlTestHistory;
    use crate::outbound::test_support::{endpoint, manager_with};

    fn group_with_history(
        members: Vec<String>,
        tolerance: u16,
    ) -> (UrlTestOutbound, Arc<UrlTestHistoryStorage>) {
        let outbounds: Vec<_> = members
            .iter()
            .map(|tag| endpoint(tag, "shadowsocks"))
            .collect();
        let manager = manager_with(&outbounds);
        let history = Arc::new(UrlTestHistoryStorage::default());
        let group = UrlTestOutbound::new(
            "auto".to_string(),
            UrlTestOutboundOptions {
                outbounds: members,
                tolerance,
                ..UrlTestOutboundOptions::default()
            },
            manager,
            history.clone(),
        )
        .unwrap();
        (group, history)
    }

    fn store(history: &UrlTestHistoryStorage, tag: &str, delay: u16) {
        history.store(
            tag.to_string(),
            UrlTestHistory {
                time: SystemTime::now(),
                delay,
            },
        );
    }

    #[tokio::test]
    async fn serves_the_fastest_member() {
        let (group, history) =
            group_with_history(vec!["a".to_string(), "b".to_string()], 0);
        group.start().await.unwrap();

        store(&history, "a", 120);
        store(&history, "b", 40);
        assert_eq!(group.now(), "b");
    }

    #[tokio::test]
    async fn without_history_the_first_member_serves() {
        let (group, _history) =
            group_with_history(vec!["a".to_string(), "b".to_string()], 0);
        group.start().await.unwrap();
        assert_eq!(group.now(), "a");
    }

    #[tokio::test]
    async fn tolerance_keeps_the_current_member() {
        let (group, history) =
            group_with_history(vec!["a".to_string(), "b".to_string()], 50);
        group.start().await.unwrap();

        store(&history, "a", 100);
        store(&history, "b", 200);
        assert_eq!(group.now(), "a");

        // b edges ahead, but within tolerance; the group stays put.
        store(&history, "b", 80);
        assert_eq!(group.now(), "a");

        // b is now decisively faster.
        store(&history, "b", 20);
        assert_eq!(group.now(), "b");
    }
}
