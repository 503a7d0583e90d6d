//! CometBFT JSON-RPC wire types.
//!
//! Thin serde mirrors of the node's JSON responses, converted into the
//! raw payload types of the core port. CometBFT serializes heights and
//! counts as strings.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use siphon_core::error::{ChainError, ChainResult};
use siphon_core::ports::{RawEvent, RawEventAttribute, RawTxResult};

// =============================================================================
// JSON-RPC Envelope
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct RpcEnvelope<T> {
    pub result: Option<T>,
    pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<String>,
}

impl RpcErrorObject {
    pub(crate) fn into_chain_error(self) -> ChainError {
        let detail = self.data.unwrap_or_default();
        ChainError::RpcError(format!("{} ({}): {detail}", self.message, self.code))
    }
}

// =============================================================================
// status
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct WireStatus {
    pub sync_info: WireSyncInfo,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireSyncInfo {
    pub latest_block_height: String,
    pub catching_up: bool,
}

// =============================================================================
// block
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct WireBlockResponse {
    pub block_id: WireBlockId,
    pub block: WireBlock,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireBlockId {
    pub hash: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireBlock {
    pub header: WireHeader,
    pub data: WireBlockData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireHeader {
    pub height: String,
    pub time: String,
    pub proposer_address: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireBlockData {
    /// Base64-encoded transaction payloads.
    #[serde(default)]
    pub txs: Vec<String>,
}

// =============================================================================
// block_results
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct WireBlockResults {
    pub height: String,
    #[serde(default)]
    pub txs_results: Option<Vec<WireTxResult>>,
    #[serde(default)]
    pub begin_block_events: Option<Vec<WireEvent>>,
    #[serde(default)]
    pub end_block_events: Option<Vec<WireEvent>>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireTxResult {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub events: Vec<WireEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<WireEventAttribute>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireEventAttribute {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

// =============================================================================
// tx_search
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct WireTxSearch {
    #[serde(default)]
    pub txs: Vec<WireSearchedTx>,
    pub total_count: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireSearchedTx {
    pub hash: String,
    pub tx_result: WireTxResult,
    /// Base64-encoded transaction payload.
    pub tx: String,
}

// =============================================================================
// Conversions
// =============================================================================

pub(crate) fn parse_height(raw: &str) -> ChainResult<u64> {
    raw.parse()
        .map_err(|_| ChainError::DecodeError(format!("invalid height \"{raw}\"")))
}

pub(crate) fn parse_time(raw: &str) -> ChainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ChainError::DecodeError(format!("invalid block time \"{raw}\": {e}")))
}

impl WireEvent {
    pub(crate) fn into_raw(self) -> RawEvent {
        RawEvent {
            event_type: self.kind,
            attributes: self
                .attributes
                .into_iter()
                .map(|a| RawEventAttribute {
                    key: a.key,
                    value: a.value,
                })
                .collect(),
        }
    }
}

impl WireTxResult {
    pub(crate) fn into_raw(self) -> RawTxResult {
        RawTxResult {
            code: self.code,
            log: self.log,
            events: self.events.into_iter().map(WireEvent::into_raw).collect(),
        }
    }
}
