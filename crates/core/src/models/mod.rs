//! Domain models representing indexed blockchain data.
//!
//! These models are storage-agnostic and represent the canonical
//! form of indexed data within the domain layer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Custom-parser outputs keyed by parser identifier.
///
/// Ordered so that artifact persistence is deterministic across runs.
pub type ParserArtifacts = BTreeMap<String, serde_json::Value>;

// =============================================================================
// Chain & Block Data
// =============================================================================

/// The chain row this run indexes into, resolved once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainRef {
    /// Database primary key of the chain row.
    pub db_id: i64,
    /// Chain identifier (e.g. "cosmoshub-4").
    pub chain_id: String,
    /// Human-readable chain name.
    pub chain_name: String,
}

/// Canonicalized block header, referenced by both tx and event batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Database primary key of the owning chain.
    pub chain_db_id: i64,
    /// Block height.
    pub height: u64,
    /// Block timestamp from the header.
    pub time: DateTime<Utc>,
    /// Proposer address (hex, as reported by the node).
    pub proposer_address: String,
    /// Block hash (hex).
    pub hash: String,
}

// =============================================================================
// Transactions
// =============================================================================

/// One parsed message inside a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageWrapper {
    /// Zero-based position within the transaction, before filtering.
    pub index: u32,
    /// Protobuf type URL (e.g. "/cosmos.bank.v1beta1.MsgSend").
    pub type_url: String,
    /// Decoded message body as JSON.
    pub body: serde_json::Value,
    /// Custom-parser outputs for this message.
    pub artifacts: ParserArtifacts,
}

/// A parsed transaction with its ordered messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxWrapper {
    /// Transaction hash (hex).
    pub hash: String,
    /// Execution result code (0 = success).
    pub code: u32,
    /// Transaction memo.
    pub memo: String,
    /// Parsed messages, in transaction order.
    pub messages: Vec<MessageWrapper>,
}

/// All transactions of one block, ready for the committer.
#[derive(Debug, Clone)]
pub struct TxBatch {
    /// The block every transaction belongs to.
    pub block: BlockRecord,
    /// Parsed transactions.
    pub txs: Vec<TxWrapper>,
}

// =============================================================================
// Block Events
// =============================================================================

/// Where in the block lifecycle an event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePosition {
    /// Emitted before transaction execution.
    BeginBlock,
    /// Emitted after transaction execution.
    EndBlock,
}

impl std::fmt::Display for LifecyclePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BeginBlock => write!(f, "begin_block"),
            Self::EndBlock => write!(f, "end_block"),
        }
    }
}

/// One parsed lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventWrapper {
    /// Event type (e.g. "coin_received").
    pub event_type: String,
    /// Ordered key/value attributes, as emitted.
    pub attributes: Vec<(String, String)>,
    /// Begin- or end-block position.
    pub lifecycle: LifecyclePosition,
    /// Custom-parser outputs for this event.
    pub artifacts: ParserArtifacts,
}

impl EventWrapper {
    /// First attribute value for a key, if present.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// All lifecycle events of one block, ready for the committer.
#[derive(Debug, Clone)]
pub struct EventBatch {
    /// The block the events belong to.
    pub block: BlockRecord,
    /// Events emitted before transaction execution, in order.
    pub begin_block_events: Vec<EventWrapper>,
    /// Events emitted after transaction execution, in order.
    pub end_block_events: Vec<EventWrapper>,
}

// =============================================================================
// Failure Bookkeeping
// =============================================================================

/// Why a height could not complete its requested work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Transaction data could not be parsed.
    UnprocessableTx,
    /// Block event parsing or filtering failed.
    FailedEventHandling,
    /// Remote node fetch failed.
    FetchFailed,
}

impl FailureReason {
    /// Stable string form used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnprocessableTx => "unprocessable_tx",
            Self::FailedEventHandling => "failed_event_handling",
            Self::FetchFailed => "fetch_failed",
        }
    }
}

/// A height that could not be indexed, upserted on `(chain, height)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedBlock {
    /// Block height.
    pub height: u64,
    /// Chain identifier.
    pub chain_id: String,
    /// Chain name.
    pub chain_name: String,
    /// Failure category.
    pub reason: FailureReason,
}

// =============================================================================
// Parser Trackers
// =============================================================================

/// Persisted registration row for a custom message parser.
///
/// Artifacts written later reference the tracker's database id, so the
/// row is created once per run before the pipeline starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageParserTracker {
    /// Database id, populated by `find_or_create_custom_message_parsers`.
    pub db_id: Option<i64>,
    /// The parser's unique identifier.
    pub identifier: String,
}

/// Persisted registration row for a custom block-event parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEventParserTracker {
    /// Database id, populated by `find_or_create_custom_block_event_parsers`.
    pub db_id: Option<i64>,
    /// The parser's unique identifier.
    pub identifier: String,
    /// Which lifecycle the parser is registered for.
    pub lifecycle: LifecyclePosition,
}
