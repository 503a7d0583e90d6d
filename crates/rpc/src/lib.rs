//! CometBFT RPC adapter for the siphon indexer.
//!
//! Implements the [`siphon_core::ports::NodeClient`] port over HTTP
//! JSON-RPC. Transaction payloads are protobuf blobs the node does not
//! interpret for us; the [`decode`] module lets embedders register module
//! decoders and falls back to deriving message types from execution
//! events.

mod client;
mod decode;
mod types;

pub use client::{HttpNodeClient, NodeClientConfig};
pub use decode::{messages_from_events, DecodedTx, TxDecoder};
