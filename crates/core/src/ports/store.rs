//! Port trait for the relational store.
//!
//! This trait defines the storage interface used by the pipeline.
//! Implementations live in the infrastructure layer (e.g., `siphon-storage`).
//!
//! All operations are idempotent on their natural keys, which makes the
//! committer's one-shot write retry safe against partial commits.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::models::{
    BlockEventParserTracker, BlockRecord, EventBatch, FailedBlock, LifecyclePosition,
    MessageParserTracker, ParserArtifacts, TxWrapper,
};

// =============================================================================
// Indexed Datasets
// =============================================================================

/// A persisted message with its database id, for custom artifact indexing.
#[derive(Debug, Clone)]
pub struct IndexedMessage {
    /// Database id of the message row.
    pub db_id: i64,
    /// Position within the transaction.
    pub index: u32,
    /// Protobuf type URL.
    pub type_url: String,
    /// Custom-parser outputs carried over from the wrapper.
    pub artifacts: ParserArtifacts,
}

/// A persisted transaction with its database id.
#[derive(Debug, Clone)]
pub struct IndexedTx {
    /// Database id of the transaction row.
    pub db_id: i64,
    /// Transaction hash.
    pub hash: String,
    /// Persisted messages.
    pub messages: Vec<IndexedMessage>,
}

/// Result of [`Store::index_new_block`]: the persisted rows with their ids.
#[derive(Debug, Clone, Default)]
pub struct IndexedTxDataset {
    /// Database id of the block row.
    pub block_db_id: i64,
    /// Persisted transactions.
    pub txs: Vec<IndexedTx>,
}

/// A persisted block event with its database id.
#[derive(Debug, Clone)]
pub struct IndexedEvent {
    /// Database id of the event row.
    pub db_id: i64,
    /// Event type.
    pub event_type: String,
    /// Begin- or end-block position.
    pub lifecycle: LifecyclePosition,
    /// Custom-parser outputs carried over from the wrapper.
    pub artifacts: ParserArtifacts,
}

/// Result of [`Store::index_block_events`].
#[derive(Debug, Clone, Default)]
pub struct IndexedEventDataset {
    /// Database id of the block row.
    pub block_db_id: i64,
    /// Persisted events.
    pub events: Vec<IndexedEvent>,
}

// =============================================================================
// Port Trait
// =============================================================================

/// Port trait for the relational store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert-or-fetch the chain row, returning its database id.
    async fn upsert_chain(&self, chain_id: &str, chain_name: &str) -> StorageResult<i64>;

    /// Persist a block and all its transactions in one transaction.
    ///
    /// Atomic per block: either everything commits or nothing does.
    /// Returns the persisted rows so custom-message indexing can reference
    /// stable ids.
    async fn index_new_block(
        &self,
        block: &BlockRecord,
        txs: &[TxWrapper],
    ) -> StorageResult<IndexedTxDataset>;

    /// Persist a block's lifecycle events in one transaction.
    ///
    /// Also upserts the block row so event rows always have a parent.
    /// With `dry_run` set, no writes are issued and the returned dataset
    /// carries placeholder ids.
    async fn index_block_events(
        &self,
        batch: &EventBatch,
        dry_run: bool,
    ) -> StorageResult<IndexedEventDataset>;

    /// Persist custom message-parser artifacts against tracker rows.
    async fn index_custom_messages(
        &self,
        dataset: &IndexedTxDataset,
        trackers: &HashMap<String, MessageParserTracker>,
    ) -> StorageResult<()>;

    /// Persist custom block-event-parser artifacts against tracker rows.
    async fn index_custom_block_events(
        &self,
        dataset: &IndexedEventDataset,
        begin_trackers: &HashMap<String, BlockEventParserTracker>,
        end_trackers: &HashMap<String, BlockEventParserTracker>,
    ) -> StorageResult<()>;

    /// Record a height whose requested work could not complete.
    ///
    /// Idempotent on `(chain, height)`; may be called concurrently from the
    /// fetch pool and the processor.
    async fn upsert_failed_block(&self, failed: &FailedBlock) -> StorageResult<()>;

    /// Record a height whose block-event handling failed.
    ///
    /// Kept separate from [`Store::upsert_failed_block`] so a height can
    /// fail one facet while the other succeeds.
    async fn upsert_failed_event_block(&self, failed: &FailedBlock) -> StorageResult<()>;

    /// Resolve tracker rows for registered custom message parsers,
    /// creating missing ones and filling in database ids.
    async fn find_or_create_custom_message_parsers(
        &self,
        trackers: &mut HashMap<String, MessageParserTracker>,
    ) -> StorageResult<()>;

    /// Resolve tracker rows for registered custom block-event parsers.
    async fn find_or_create_custom_block_event_parsers(
        &self,
        trackers: &mut HashMap<String, BlockEventParserTracker>,
    ) -> StorageResult<()>;

    /// Run embedder-provided schema statements once at setup.
    ///
    /// Statements must be idempotent (e.g. `CREATE TABLE IF NOT EXISTS`)
    /// since they run on every start.
    async fn migrate_custom_models(&self, statements: &[String]) -> StorageResult<()>;

    /// Heights of a chain that historically contained a message type.
    ///
    /// Bootstrap read for reindex mode; runs before the pipeline starts.
    async fn heights_for_message_type(
        &self,
        chain_id: &str,
        msg_type_url: &str,
    ) -> StorageResult<Vec<u64>>;
}
