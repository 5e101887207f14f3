use serde::Deserialize;
use strand_config::outbound::OutboundOptions;

use crate::adapter::{BoxError, SubscriptionParser};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("subscription payload is not utf-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("subscription payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct SubscriptionDocument {
    outbounds: Vec<OutboundOptions>,
}

/// Built-in payload parser for JSON subscriptions, either a bare outbound
/// array or a document with an `outbounds` field. Clash YAML and raw
/// link-list payloads are served by external implementations of the same
/// trait.
pub struct JsonSubscriptionParser;

impl SubscriptionParser for JsonSubscriptionParser {
    fn parse(&self, body: &[u8]) -> Result<Vec<OutboundOptions>, BoxError> {
        let body = std::str::from_utf8(body).map_err(ParseError::NotUtf8)?;
        if body.trim_start().starts_with('[') {
            return Ok(serde_json::from_str::<Vec<OutboundOptions>>(body)
                .map_err(ParseError::Json)?);
        }
        let document =
            serde_json::from_str::<SubscriptionDocument>(body).map_err(ParseError::Json)?;
        Ok(document.outbounds)
    }
}
