//! Bank module parsers.

use serde_json::json;

use siphon_core::error::{ParseError, ParseResult};
use siphon_core::models::BlockRecord;
use siphon_core::ports::{MessageParser, RawMessage};

/// Type URL handled by [`BankTransferParser`].
pub const MSG_SEND_TYPE_URL: &str = "/cosmos.bank.v1beta1.MsgSend";

/// Extracts a flat transfer record from `MsgSend` messages.
///
/// The artifact is `{from, to, amount}` so downstream consumers can query
/// transfers without unpacking full message bodies.
pub struct BankTransferParser;

impl MessageParser for BankTransferParser {
    fn identifier(&self) -> &str {
        "bank_transfers"
    }

    fn parse(&self, block: &BlockRecord, message: &RawMessage) -> ParseResult<serde_json::Value> {
        let from = field(message, "from_address", "sender")?;
        let to = field(message, "to_address", "recipient")?;
        // Amount is optional in event-derived bodies
        let amount = message
            .body
            .get("amount")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        Ok(json!({
            "height": block.height,
            "from": from,
            "to": to,
            "amount": amount,
        }))
    }
}

/// Look up a field under its protobuf name, falling back to the event
/// attribute name used when the message body was derived from events.
fn field(message: &RawMessage, proto_name: &str, event_name: &str) -> ParseResult<String> {
    message
        .body
        .get(proto_name)
        .or_else(|| message.body.get(event_name))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ParseError::CustomParser {
            identifier: "bank_transfers".into(),
            message: format!("MsgSend body missing {proto_name}"),
        })
}
