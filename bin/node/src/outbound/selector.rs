use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use async_trait::async_trait;
use strand_config::outbound::{SelectorOutboundOptions, TYPE_SELECTOR};
use tracing::debug;

use crate::adapter::matcher::MatcherError;
use crate::adapter::{BoxError, Outbound, OutboundGroup, OutboundManager, Starter};
use crate::outbound::{
    compile_provider_rules, group_dependencies, resolve_members, GroupError, ProviderRule,
};

/// User-driven group. Members come from the static list plus any referenced
/// providers; the selection sticks until `select` changes it.
pub struct SelectorOutbound {
    tag: String,
    options: SelectorOutboundOptions,
    provider_rules: Vec<ProviderRule>,
    manager: Arc<OutboundManager>,
    members: ArcSwap<Vec<String>>,
    selected: ArcSwapOption<String>,
}

impl SelectorOutbound {
    pub fn new(
        tag: String,
        options: SelectorOutboundOptions,
        manager: Arc<OutboundManager>,
    ) -> Result<Self, MatcherError> {
        let provider_rules = compile_provider_rules(&options.providers)?;
        Ok(Self {
            tag,
            options,
            provider_rules,
            manager,
            members: ArcSwap::from_pointee(Vec::new()),
            selected: ArcSwapOption::empty(),
        })
    }

    pub fn members(&self) -> Vec<String> {
        self.members.load().as_ref().clone()
    }

    /// Switches the group onto another member.
    pub fn select(&self, tag: &str) -> Result<(), GroupError> {
        if !self.members.load().iter().any(|member| member == tag) {
            return Err(GroupError::NotAMember {
                tag: self.tag.clone(),
                member: tag.to_string(),
            });
        }
        debug!("selector [{}] switched to [{tag}]", self.tag);
        self.selected.store(Some(Arc::new(tag.to_string())));
        Ok(())
    }
}

impl Outbound for SelectorOutbound {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn outbound_type(&self) -> &str {
        TYPE_SELECTOR
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
impl Starter for SelectorOutbound {
    async fn start(&self) -> Result<(), BoxError> {
        let members = resolve_members(
            &self.tag,
            &self.options.outbounds,
            &self.provider_rules,
            &self.manager,
        )?;
        let selected = self
            .options
            .default
            .clone()
            .filter(|default| members.contains(default))
            .or_else(|| members.first().cloned());
        self.members.store(Arc::new(members));
        self.selected.store(selected.map(Arc::new));
        Ok(())
    }
}

impl OutboundGroup for SelectorOutbound {
    fn now(&self) -> String {
        self.selected
            .load()
            .as_ref()
            .map(|selected| selected.as_ref().clone())
            .unwrap_or_default()
    }
}
