mod filter;
mod group;

use std::collections::HashMap;

use once_cell::sync::Lazy;
use strand_config::outbound::OutboundOptions;

use crate::adapter::matcher::MatcherError;
use crate::provider::matcher::RuleMatcher;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("missing action name")]
    MissingAction,
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("invalid action options: {0}")]
    InvalidOptions(#[from] serde_json::Error),
    #[error("invalid rule[{index}]: {rule}: {source}")]
    InvalidRule {
        index: usize,
        rule: String,
        source: MatcherError,
    },
    #[error("invalid outbound type: {0}")]
    InvalidOutboundType(String),
    #[error("no outbounds matched")]
    NoOutboundsMatched,
}

/// A single transformation over the fetched outbound list. Actions run in
/// configuration order on a shared processor, so earlier changes are visible
/// to later actions.
pub trait ProviderAction: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, processor: &mut OutboundProcessor) -> Result<(), ActionError>;
}

impl std::fmt::Debug for dyn ProviderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAction")
            .field("name", &self.name())
            .finish()
    }
}

type ActionConstructor = fn(serde_json::Value) -> Result<Box<dyn ProviderAction>, ActionError>;

static ACTIONS: Lazy<HashMap<&'static str, ActionConstructor>> = Lazy::new(|| {
    let mut registry: HashMap<&'static str, ActionConstructor> = HashMap::new();
    registry.insert("filter", filter::FilterAction::from_options);
    registry.insert("group", group::GroupAction::from_options);
    registry
});

/// Builds an action from its raw configuration blob, dispatching on the
/// `action` field.
pub fn new_action(options: &serde_json::Value) -> Result<Box<dyn ProviderAction>, ActionError> {
    let name = options
        .get("action")
        .and_then(|value| value.as_str())
        .ok_or(ActionError::MissingAction)?;
    let constructor = ACTIONS
        .get(name)
        .ok_or_else(|| ActionError::UnknownAction(name.to_string()))?;
    constructor(options.clone())
}

pub(crate) fn compile_rules(rules: &[String]) -> Result<Vec<RuleMatcher>, ActionError> {
    rules
        .iter()
        .enumerate()
        .map(|(index, rule)| {
            RuleMatcher::parse(rule).map_err(|source| ActionError::InvalidRule {
                index,
                rule: rule.clone(),
                source,
            })
        })
        .collect()
}

/// The mutable working set the actions operate on: the subscription's basic
/// outbounds in insertion order, plus the group outbounds appended by
/// `group` actions. Group outbounds are kept apart so later actions keep
/// iterating the basic set only.
pub struct OutboundProcessor {
    basic: Vec<OutboundOptions>,
    groups: Vec<OutboundOptions>,
}

impl OutboundProcessor {
    pub fn new(outbounds: Vec<OutboundOptions>) -> Self {
        Self {
            basic: outbounds,
            groups: Vec::new(),
        }
    }

    /// Visits the basic outbounds in order; the visitor returns `false` to
    /// stop early.
    pub fn for_each_outbounds(&self, mut visit: impl FnMut(&OutboundOptions) -> bool) {
        for outbound in &self.basic {
            if !visit(outbound) {
                break;
            }
        }
    }

    pub fn delete_outbound(&mut self, tag: &str) {
        self.basic.retain(|outbound| outbound.tag != tag);
    }

    pub fn add_group_outbound(&mut self, options: OutboundOptions) {
        self.groups.push(options);
    }

    pub fn basic_outbounds(&self) -> &[OutboundOptions] {
        &self.basic
    }

    /// Concatenates basic and group outbounds for instantiation.
    pub fn build(self) -> Vec<OutboundOptions> {
        let mut outbounds = self.basic;
        outbounds.extend(self.groups);
        outbounds
    }
}
