use regex_automata::meta::Regex;
use strand_config::outbound::OutboundOptions;

use crate::adapter::Outbound;

#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("invalid rule: {rule}: {source}")]
    InvalidRule {
        rule: String,
        source: regex_automata::meta::BuildError,
    },
    #[error("invalid rule[{index}]: {rule}: {source}")]
    InvalidGroupRule {
        index: usize,
        rule: String,
        source: Box<MatcherError>,
    },
    #[error("missing logical")]
    MissingLogical,
    #[error("missing rules")]
    MissingRules,
    #[error("invalid logical: {0}")]
    InvalidLogical(String),
}

/// A single matcher rule: `type:<name>` compares the outbound type exactly,
/// `tag:<regex>` and a bare regex both match against the outbound tag.
#[derive(Debug)]
pub enum OutboundMatcher {
    TagRegex(Regex),
    Type(String),
}

impl OutboundMatcher {
    pub fn parse(rule: &str) -> Result<Self, MatcherError> {
        if let Some(type_name) = rule.strip_prefix("type:") {
            return Ok(OutboundMatcher::Type(type_name.to_string()));
        }
        let pattern = rule.strip_prefix("tag:").unwrap_or(rule);
        let regex = Regex::new(pattern).map_err(|source| MatcherError::InvalidRule {
            rule: rule.to_string(),
            source,
        })?;
        Ok(OutboundMatcher::TagRegex(regex))
    }

    pub fn match_options(&self, options: &OutboundOptions) -> bool {
        match self {
            OutboundMatcher::TagRegex(regex) => regex.is_match(&options.tag),
            OutboundMatcher::Type(type_name) => type_name == options.outbound_type(),
        }
    }

    pub fn match_outbound(&self, outbound: &dyn Outbound) -> bool {
        match self {
            OutboundMatcher::TagRegex(regex) => regex.is_match(outbound.tag()),
            OutboundMatcher::Type(type_name) => type_name == outbound.outbound_type(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchLogical {
    And,
    Or,
}

impl MatchLogical {
    fn parse(logical: &str) -> Result<Self, MatcherError> {
        match logical {
            "and" => Ok(MatchLogical::And),
            "or" => Ok(MatchLogical::Or),
            "" => Err(MatcherError::MissingLogical),
            other => Err(MatcherError::InvalidLogical(other.to_string())),
        }
    }
}

/// Rules combined under an explicit `and`/`or` mode. Matches both parsed
/// options and live outbounds, so it serves the provider pipeline and the
/// runtime groups alike.
#[derive(Debug)]
pub struct OutboundMatcherGroup {
    rules: Vec<OutboundMatcher>,
    logical: MatchLogical,
}

impl OutboundMatcherGroup {
    pub fn new(rules: &[String], logical: &str) -> Result<Self, MatcherError> {
        let logical = MatchLogical::parse(logical)?;
        if rules.is_empty() {
            return Err(MatcherError::MissingRules);
        }
        let rules = rules
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                OutboundMatcher::parse(rule).map_err(|source| MatcherError::InvalidGroupRule {
                    index,
                    rule: rule.clone(),
                    source: Box::new(source),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules, logical })
    }

    pub fn match_options(&self, options: &OutboundOptions) -> bool {
        match self.logical {
            MatchLogical::And => self.rules.iter().all(|rule| rule.match_options(options)),
            MatchLogical::Or => self.rules.iter().any(|rule| rule.match_options(options)),
        }
    }

    pub fn match_outbound(&self, outbound: &dyn Outbound) -> bool {
        match self.logical {
            MatchLogical::And => self.rules.iter().all(|rule| rule.match_outbound(outbound)),
            MatchLogical::Or => self.rules.iter().any(|rule| rule.match_outbound(outbound)),
        }
    }
}
