//! Port trait for the remote node.
//!
//! This trait defines the interface for fetching blocks, block results and
//! transactions from a CometBFT node. Implementations live in the
//! infrastructure layer (e.g., `siphon-rpc`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ChainResult;

// =============================================================================
// Raw Payloads
// =============================================================================

/// Raw block data from the node before domain transformation.
#[derive(Debug, Clone)]
pub struct BlockData {
    /// Block height.
    pub height: u64,
    /// Block hash (hex).
    pub hash: String,
    /// Header timestamp.
    pub time: DateTime<Utc>,
    /// Proposer address (hex).
    pub proposer_address: String,
    /// Decoded transactions from the block body.
    ///
    /// Execution results are not part of the block itself; they come from
    /// block results or tx search.
    pub txs: Vec<RawTx>,
}

/// A decoded transaction without its execution result.
#[derive(Debug, Clone)]
pub struct RawTx {
    /// Transaction hash (hex).
    pub hash: String,
    /// Transaction memo.
    pub memo: String,
    /// Decoded messages, in order.
    pub messages: Vec<RawMessage>,
}

/// One decoded message of a transaction.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Protobuf type URL.
    pub type_url: String,
    /// Message body as JSON.
    pub body: serde_json::Value,
}

/// Execution result of one transaction.
#[derive(Debug, Clone)]
pub struct RawTxResult {
    /// Result code (0 = success).
    pub code: u32,
    /// Raw log output.
    pub log: String,
    /// Events emitted during execution.
    pub events: Vec<RawEvent>,
}

/// An ABCI event as emitted by the node.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Event type.
    pub event_type: String,
    /// Ordered attributes.
    pub attributes: Vec<RawEventAttribute>,
}

/// One key/value attribute of an event.
#[derive(Debug, Clone)]
pub struct RawEventAttribute {
    /// Attribute key.
    pub key: String,
    /// Attribute value.
    pub value: String,
}

/// Block results: lifecycle events plus per-transaction execution results.
#[derive(Debug, Clone)]
pub struct BlockResultsData {
    /// Block height.
    pub height: u64,
    /// Events emitted before transaction execution.
    pub begin_block_events: Vec<RawEvent>,
    /// Events emitted after transaction execution.
    pub end_block_events: Vec<RawEvent>,
    /// Execution results, one per transaction in block order.
    pub tx_results: Vec<RawTxResult>,
}

/// A transaction paired with its execution result, from tx search.
#[derive(Debug, Clone)]
pub struct FetchedTx {
    /// The decoded transaction.
    pub tx: RawTx,
    /// Its execution result.
    pub result: RawTxResult,
}

/// Batched tx-search response for one height.
#[derive(Debug, Clone)]
pub struct TxSearchResponse {
    /// All transactions of the height, in block order.
    pub txs: Vec<FetchedTx>,
}

/// Node sync status.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    /// Height of the node's current tip.
    pub latest_block_height: u64,
    /// Whether the node is still replaying history.
    pub catching_up: bool,
}

// =============================================================================
// Port Trait
// =============================================================================

/// Port trait for the remote CometBFT node.
///
/// Every call may fail; callers retry `EOF`-suffixed transport errors once
/// at the call site (see [`crate::error::ChainError::is_eof`]).
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Fetch a block header and body by height.
    async fn block_by_height(&self, height: u64) -> ChainResult<BlockData>;

    /// Fetch block results (lifecycle events + tx execution results) by height.
    async fn block_results_by_height(&self, height: u64) -> ChainResult<BlockResultsData>;

    /// Fetch all transactions of a height via tx search.
    ///
    /// Preferred over deriving transactions from block results because the
    /// response pairs each transaction with its execution result directly.
    async fn tx_search(&self, height: u64) -> ChainResult<TxSearchResponse>;

    /// Fetch the node's sync status.
    async fn status(&self) -> ChainResult<NodeStatus>;
}
