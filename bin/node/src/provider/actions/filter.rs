use serde::Deserialize;
use tracing::debug;

use crate::provider::actions::{
    compile_rules, ActionError, OutboundProcessor, ProviderAction,
};
use crate::provider::matcher::RuleMatcher;

#[derive(Deserialize)]
struct FilterActionOptions {
    #[serde(default)]
    rules: Vec<String>,
    #[serde(default)]
    white_mode: bool,
}

/// Deletes outbounds from the basic set. Blacklist by default: matched
/// outbounds go away. In white mode the unmatched ones go away instead.
pub(super) struct FilterAction {
    matchers: Vec<RuleMatcher>,
    white_mode: bool,
}

impl FilterAction {
    pub(super) fn from_options(
        options: serde_json::Value,
    ) -> Result<Box<dyn ProviderAction>, ActionError> {
        let options: FilterActionOptions = serde_json::from_value(options)?;
        Ok(Box::new(FilterAction {
            matchers: compile_rules(&options.rules)?,
            white_mode: options.white_mode,
        }))
    }
}

impl ProviderAction for FilterAction {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn apply(&self, processor: &mut OutboundProcessor) -> Result<(), ActionError> {
        // Deletions are collected first; mutating the set mid-iteration
        // would invalidate the visit order.
        let mut delete_tags = Vec::new();
        processor.for_each_outbounds(|outbound| {
            let matched = self.matchers.iter().any(|matcher| matcher.matches(outbound));
            if matched {
                if !self.white_mode {
                    delete_tags.push(outbound.tag.clone());
                }
            } else if self.white_mode {
                delete_tags.push(outbound.tag.clone());
            }
            true
        });
        for tag in delete_tags {
            debug!("filter outbound: {tag}");
            processor.delete_outbound(&tag);
        }
        Ok(())
    }
}
