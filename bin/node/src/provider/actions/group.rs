use serde::Deserialize;
use strand_config::outbound::{OutboundKind, OutboundOptions};
use tracing::debug;

use crate::provider::actions::{
    compile_rules, ActionError, OutboundProcessor, ProviderAction,
};
use crate::provider::matcher::RuleMatcher;

#[derive(Deserialize)]
struct GroupActionOptions {
    #[serde(default)]
    rules: Vec<String>,
    #[serde(default)]
    black_mode: bool,
    outbound: OutboundOptions,
}

/// Collects matching outbound tags into a new selector/url-test group built
/// from the configured template. Black mode collects the unmatched tags
/// instead. The basic set itself is left untouched.
pub(super) struct GroupAction {
    matchers: Vec<RuleMatcher>,
    black_mode: bool,
    template: OutboundOptions,
}

impl GroupAction {
    pub(super) fn from_options(
        options: serde_json::Value,
    ) -> Result<Box<dyn ProviderAction>, ActionError> {
        let options: GroupActionOptions = serde_json::from_value(options)?;
        match options.outbound.kind {
            OutboundKind::Selector(_) | OutboundKind::UrlTest(_) => {}
            _ => {
                return Err(ActionError::InvalidOutboundType(
                    options.outbound.outbound_type().to_string(),
                ))
            }
        }
        Ok(Box::new(GroupAction {
            matchers: compile_rules(&options.rules)?,
            black_mode: options.black_mode,
            template: options.outbound,
        }))
    }
}

impl ProviderAction for GroupAction {
    fn name(&self) -> &'static str {
        "group"
    }

    fn apply(&self, processor: &mut OutboundProcessor) -> Result<(), ActionError> {
        let mut member_tags = Vec::new();
        processor.for_each_outbounds(|outbound| {
            let matched = self.matchers.iter().any(|matcher| matcher.matches(outbound));
            if matched != self.black_mode {
                member_tags.push(outbound.tag.clone());
            }
            true
        });
        if member_tags.is_empty() {
            return Err(ActionError::NoOutboundsMatched);
        }

        let mut group = self.template.clone();
        match &mut group.kind {
            OutboundKind::Selector(options) => options.outbounds = member_tags,
            OutboundKind::UrlTest(options) => options.outbounds = member_tags,
            // Rejected at construction.
            _ => unreachable!("group template is always selector or url-test"),
        }
        debug!("add group outbound: {}", group.tag);
        processor.add_group_outbound(group);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::provider::actions::test_support::{direct, vmess};
    use crate::provider::actions::new_action;

    #[test]
    fn collects_matched_tags_into_the_template() {
        let action = new_action(&json!({
            "action": "group",
            "rules": ["type:vmess"],
            "outbound": { "tag": "auto", "type": "url-test" }
        }))
        .unwrap();
        let mut processor =
            OutboundProcessor::new(vec![vmess("v1"), vmess("v2"), direct("d")]);

        action.apply(&mut processor).unwrap();

        // The basic set is unchanged; the group landed separately.
        assert_eq!(processor.basic_outbounds().len(), 3);
        let built = processor.build();
        let group = built.last().unwrap();
        assert_eq!(group.tag, "auto");
        match &group.kind {
            OutboundKind::UrlTest(options) => {
                assert_eq!(options.outbounds, vec!["v1", "v2"]);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn black_mode_collects_the_unmatched_tags() {
        let action = new_action(&json!({
            "action": "group",
            "rules": ["type:vmess"],
            "black_mode": true,
            "outbound": { "tag": "rest", "type": "selector" }
        }))
        .unwrap();
        let mut processor =
            OutboundProcessor::new(vec![vmess("v1"), direct("d1"), direct("d2")]);

        action.apply(&mut processor).unwrap();

        let built = processor.build();
        match &built.last().unwrap().kind {
            OutboundKind::Selector(options) => {
                assert_eq!(options.outbounds, vec!["d1", "d2"]);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn empty_result_is_an_error() {
        let action = new_action(&json!({
            "action": "group",
            "rules": ["type:vmess"],
            "outbound": { "tag": "auto", "type": "url-test" }
        }))
        .unwrap();
        let mut processor = OutboundProcessor::new(vec![direct("d")]);

        assert!(matches!(
            action.apply(&mut processor).unwrap_err(),
            ActionError::NoOutboundsMatched
        ));
    }

    #[test]
    fn template_must_be_a_group_type() {
        let err = new_action(&json!({
            "action": "group",
            "rules": ["type:vmess"],
            "outbound": { "tag": "nope", "type": "direct" }
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            ActionError::InvalidOutboundType(type_name) if type_name == "direct"
        ));
    }

    #[test]
    fn later_filters_do_not_see_group_outbounds() {
        let group = new_action(&json!({
            "action": "group",
            "rules": ["type:vmess"],
            "outbound": { "tag": "auto", "type": "url-test" }
        }))
        .unwrap();
        let filter = new_action(&json!({
            "action": "filter",
            "rules": ["auto"]
        }))
        .unwrap();
        let mut processor = OutboundProcessor::new(vec![vmess("v1")]);

        group.apply(&mut processor).unwrap();
        filter.apply(&mut processor).unwrap();

        let built = processor.build();
        let tags: Vec<_> = built.iter().map(|o| o.tag.as_str()).collect();
        // The filter ran after the group finished; the group outbound stays.
        assert_eq!(tags, vec!["v1", "auto"]);
    }
}
