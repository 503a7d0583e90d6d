//! Transaction payload decoding.
//!
//! Block bodies and tx-search responses carry transactions as opaque
//! protobuf payloads. Chains extend the standard modules, so decoding is
//! pluggable: embedders register [`TxDecoder`]s for the modules their
//! chain ships, and the first decoder that recognizes a payload wins.
//!
//! When no decoder claims a transaction, its messages are derived from
//! the execution events instead: the standard `message` events carry the
//! acted-upon type URL in their `action` attribute. That keeps message
//! typing (and therefore filters and custom parsers) working without any
//! chain-specific decoding.

use siphon_core::error::ChainResult;
use siphon_core::ports::{RawEvent, RawMessage};

/// A decoded transaction payload.
#[derive(Debug, Clone, Default)]
pub struct DecodedTx {
    /// Transaction memo.
    pub memo: String,
    /// Decoded messages, in order.
    pub messages: Vec<RawMessage>,
}

/// Module decoder for raw transaction payloads.
///
/// Registered on the client before the pipeline starts. Returning
/// `Ok(None)` means "not mine", letting the next decoder try.
pub trait TxDecoder: Send + Sync {
    /// Attempt to decode one raw transaction payload.
    fn decode_tx(&self, bytes: &[u8]) -> ChainResult<Option<DecodedTx>>;
}

/// Derive messages from a transaction's execution events.
///
/// One [`RawMessage`] per `message` event carrying an `action` attribute,
/// in event order; the event's remaining attributes become the body.
pub fn messages_from_events(events: &[RawEvent]) -> Vec<RawMessage> {
    let mut messages = Vec::new();

    for event in events {
        if event.event_type != "message" {
            continue;
        }
        let Some(action) = event
            .attributes
            .iter()
            .find(|a| a.key == "action")
            .map(|a| a.value.clone())
        else {
            continue;
        };

        let body: serde_json::Map<String, serde_json::Value> = event
            .attributes
            .iter()
            .filter(|a| a.key != "action")
            .map(|a| (a.key.clone(), serde_json::Value::String(a.value.clone())))
            .collect();

        messages.push(RawMessage {
            type_url: action,
            body: serde_json::Value::Object(body),
        });
    }

    messages
}
