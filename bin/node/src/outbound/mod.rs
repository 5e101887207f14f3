pub mod direct;
pub mod selector;
pub mod urltest;

use std::sync::Arc;

use strand_config::outbound::{GroupProviderOptions, OutboundKind, OutboundOptions};

use crate::adapter::matcher::{MatcherError, OutboundMatcherGroup};
use crate::adapter::{BoxError, Outbound, OutboundFactory, OutboundManager};
use crate::history::UrlTestHistoryStorage;
use crate::outbound::direct::DirectOutbound;
use crate::outbound::selector::SelectorOutbound;
use crate::outbound::urltest::UrlTestOutbound;

#[derive(Debug, thiserror::Error)]
pub enum OutboundBuildError {
    #[error("missing outbound tag")]
    MissingTag,
    #[error(transparent)]
    Matcher(#[from] MatcherError),
}

#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("outbound provider [{0}] not found")]
    ProviderNotFound(String),
    #[error("outbound [{0}] not found")]
    OutboundNotFound(String),
    #[error("group [{0}] has no members")]
    NoMembers(String),
    #[error("outbound [{member}] is not a member of group [{tag}]")]
    NotAMember { tag: String, member: String },
}

/// Builds live outbounds from parsed options. Group types and `direct` get
/// the built-in implementations; protocol-native types are represented as
/// plain endpoints whose wire behavior lives in external dialer
/// implementations.
pub struct OutboundRegistry {
    manager: Arc<OutboundManager>,
    history: Arc<UrlTestHistoryStorage>,
}

impl OutboundRegistry {
    pub fn new(manager: Arc<OutboundManager>, history: Arc<UrlTestHistoryStorage>) -> Self {
        Self { manager, history }
    }
}

impl OutboundFactory for OutboundRegistry {
    fn create(&self, options: &OutboundOptions) -> Result<Arc<dyn Outbound>, BoxError> {
        if options.tag.is_empty() {
            return Err(Box::new(OutboundBuildError::MissingTag));
        }
        let outbound: Arc<dyn Outbound> = match &options.kind {
            OutboundKind::Direct(_) => Arc::new(DirectOutbound::new(options.tag.clone())),
            OutboundKind::Selector(selector_options) => Arc::new(
                SelectorOutbound::new(
                    options.tag.clone(),
                    selector_options.clone(),
                    self.manager.clone(),
                )
                .map_err(OutboundBuildError::Matcher)?,
            ),
            OutboundKind::UrlTest(urltest_options) => Arc::new(
                UrlTestOutbound::new(
                    options.tag.clone(),
                    urltest_options.clone(),
                    self.manager.clone(),
                    self.history.clone(),
                )
                .map_err(OutboundBuildError::Matcher)?,
            ),
            OutboundKind::Shadowsocks(_)
            | OutboundKind::Trojan(_)
            | OutboundKind::Vmess(_)
            | OutboundKind::Http(_) => Arc::new(EndpointOutbound::from_options(options)),
        };
        Ok(outbound)
    }
}

/// A protocol-native endpoint as the graph sees it: a tag, a type and an
/// optional detour. Stateless, so it never enters the dependency graph as a
/// starter.
pub struct EndpointOutbound {
    tag: String,
    outbound_type: &'static str,
    detour: Option<String>,
}

impl EndpointOutbound {
    fn from_options(options: &OutboundOptions) -> Self {
        let detour = match &options.kind {
            OutboundKind::Shadowsocks(o) => o.detour.clone(),
            OutboundKind::Trojan(o) => o.detour.clone(),
            OutboundKind::Vmess(o) => o.detour.clone(),
            OutboundKind::Http(o) => o.detour.clone(),
            _ => None,
        };
        Self {
            tag: options.tag.clone(),
            outbound_type: options.outbound_type(),
            detour,
        }
    }
}

impl Outbound for EndpointOutbound {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn outbound_type(&self) -> &str {
        self.outbound_type
    }

    fn dependencies(&self) -> Vec<String> {
        self.detour.iter().cloned().collect()
    }
}

/// A compiled `providers` reference of a group.
pub(crate) struct ProviderRule {
    pub(crate) tag: String,
    pub(crate) matcher: Option<OutboundMatcherGroup>,
    pub(crate) invert: bool,
}

pub(crate) fn compile_provider_rules(
    references: &[GroupProviderOptions],
) -> Result<Vec<ProviderRule>, MatcherError> {
    references
        .iter()
        .map(|reference| {
            let matcher = if reference.rules.is_empty() {
                None
            } else {
                Some(OutboundMatcherGroup::new(
                    &reference.rules,
                    &reference.logical,
                )?)
            };
            Ok(ProviderRule {
                tag: reference.tag.clone(),
                matcher,
                invert: reference.invert,
            })
        })
        .collect()
}

/// Resolves a group's member list against the manager: the static members
/// first, then whatever each referenced provider produced, filtered by the
/// compiled rules. Every member must already be started.
pub(crate) fn resolve_members(
    group_tag: &str,
    static_members: &[String],
    provider_rules: &[ProviderRule],
    manager: &OutboundManager,
) -> Result<Vec<String>, GroupError> {
    let mut members = static_members.to_vec();
    for rule in provider_rules {
        let provider = manager
            .provider(&rule.tag)
            .ok_or_else(|| GroupError::ProviderNotFound(rule.tag.clone()))?;
        for outbound in provider.outbounds() {
            let matched = rule
                .matcher
                .as_ref()
                .map(|matcher| matcher.match_outbound(outbound.as_ref()))
                .unwrap_or(true);
            if matched != rule.invert {
                members.push(outbound.tag().to_string());
            }
        }
    }
    for member in &members {
        if manager.outbound(member).is_none() {
            return Err(GroupError::OutboundNotFound(member.clone()));
        }
    }
    if members.is_empty() {
        return Err(GroupError::NoMembers(group_tag.to_string()));
    }
    Ok(members)
}

/// Dependency list shared by both group types: static members plus provider
/// tags. A provider's aggregate selector bears the provider tag, so waiting
/// for it transitively waits for everything the provider produced.
pub(crate) fn group_dependencies(
    static_members: &[String],
    references: &[GroupProviderOptions],
) -> Vec<String> {
    let mut dependencies = static_members.to_vec();
    dependencies.extend(references.iter().map(|reference| reference.tag.clone()));
    dependencies
}
