use std::{collections::HashMap, time::Duration};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::outbound::SelectorOutboundOptions;

/// A remote subscription that is fetched periodically and materialized into
/// a set of outbounds plus one aggregate selector named after the provider.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OutboundProviderOptions {
    pub tag: String,
    /// Subscription URL. Required.
    #[serde(default)]
    pub url: String,
    /// Key the fetched payload is cached under. Defaults to the provider tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_tag: Option<String>,
    /// How often the subscription is refetched. Absent or zero disables the
    /// refresh loop.
    #[serde(
        default,
        deserialize_with = "humantime_serde::deserialize",
        serialize_with = "humantime_serde::serialize"
    )]
    #[schemars(with = "Option<String>")]
    pub update_interval: Option<Duration>,
    /// Overall deadline for a single fetch.
    #[serde(
        default,
        deserialize_with = "humantime_serde::deserialize",
        serialize_with = "humantime_serde::serialize"
    )]
    #[schemars(with = "Option<String>")]
    pub request_timeout: Option<Duration>,
    /// Fetches the subscription over HTTP/3 instead of HTTP/2.
    #[serde(default)]
    pub http3: bool,
    /// Extra request headers. Entries override the default User-Agent.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Template for the aggregate selector generated under the provider tag.
    /// Its `outbounds` preamble is kept at the head of the member list, so a
    /// manually pinned default stays first.
    #[serde(default)]
    pub selector: SelectorOutboundOptions,
    /// Outbound the subscription request is routed through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detour: Option<String>,
    /// Transformations applied to the fetched outbound list, in order. Each
    /// entry is dispatched on its `action` field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_options_parse_with_defaults() {
        let parsed: OutboundProviderOptions = serde_json::from_value(serde_json::json!({
            "tag": "airport",
            "url": "https://example.com/subscription",
            "update_interval": "12h",
            "actions": [
                { "action": "filter", "rules": ["type:direct"] }
            ]
        }))
        .unwrap();
        assert_eq!(parsed.tag, "airport");
        assert_eq!(parsed.update_interval, Some(Duration::from_secs(12 * 3600)));
        assert!(parsed.cache_tag.is_none());
        assert!(!parsed.http3);
        assert_eq!(parsed.actions.len(), 1);
    }
}
