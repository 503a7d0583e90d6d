//! Staking module parsers.

use serde_json::json;

use siphon_core::error::{ParseError, ParseResult};
use siphon_core::models::BlockRecord;
use siphon_core::ports::{BlockEventParser, RawEvent};

/// End-block event type handled by [`UnbondingCompleteParser`].
pub const COMPLETE_UNBONDING_EVENT_TYPE: &str = "complete_unbonding";

/// Extracts completed unbondings from end-block events.
///
/// Unbondings mature during end-block processing, not inside any
/// transaction, so this is only useful registered for the end-block
/// lifecycle.
pub struct UnbondingCompleteParser;

impl BlockEventParser for UnbondingCompleteParser {
    fn identifier(&self) -> &str {
        "staking_unbondings"
    }

    fn parse(&self, block: &BlockRecord, event: &RawEvent) -> ParseResult<serde_json::Value> {
        let attribute = |key: &str| -> ParseResult<String> {
            event
                .attributes
                .iter()
                .find(|a| a.key == key)
                .map(|a| a.value.clone())
                .ok_or_else(|| ParseError::CustomParser {
                    identifier: "staking_unbondings".into(),
                    message: format!("complete_unbonding event missing {key}"),
                })
        };

        Ok(json!({
            "height": block.height,
            "validator": attribute("validator")?,
            "delegator": attribute("delegator")?,
            "amount": attribute("amount")?,
        }))
    }
}
