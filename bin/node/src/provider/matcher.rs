use regex_automata::meta::Regex;
use strand_config::outbound::OutboundOptions;

use crate::adapter::matcher::MatcherError;

/// Provider-time rule matcher. Same grammar as the public matcher, but it
/// only ever sees parsed options: the action pipeline runs before any live
/// outbound exists.
#[derive(Debug)]
pub(crate) enum RuleMatcher {
    TagRegex(Regex),
    Type(String),
}

impl RuleMatcher {
    pub(crate) fn parse(rule: &str) -> Result<Self, MatcherError> {
        if let Some(type_name) = rule.strip_prefix("type:") {
            return Ok(RuleMatcher::Type(type_name.to_string()));
        }
        let pattern = rule.strip_prefix("tag:").unwrap_or(rule);
        let regex = Regex::new(pattern).map_err(|source| MatcherError::InvalidRule {
            rule: rule.to_string(),
            source,
        })?;
        Ok(RuleMatcher::TagRegex(regex))
    }

    pub(crate) fn matches(&self, options: &OutboundOptions) -> bool {
        match self {
            RuleMatcher::TagRegex(regex) => regex.is_match(&options.tag),
            RuleMatcher::Type(type_name) => type_name == options.outbound_type(),
        }
    }
}
