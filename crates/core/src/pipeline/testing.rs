//! In-memory test doubles for the pipeline's ports.
//!
//! `MockNodeClient` serves canned per-height fixtures with injectable
//! failures; `RecordingStore` captures every write so tests can assert on
//! the final store contents.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::{ChainError, ChainResult, IndexerResult, StorageError, StorageResult};
use crate::models::{
    BlockEventParserTracker, BlockRecord, EventBatch, EventWrapper, FailedBlock, FailureReason,
    LifecyclePosition, MessageParserTracker, TxWrapper,
};
use crate::pipeline::enqueue::{BlockEnqueuer, EnqueueJob};
use crate::ports::{
    BlockData, BlockResultsData, FetchedTx, IndexedEvent, IndexedEventDataset, IndexedMessage,
    IndexedTx, IndexedTxDataset, NodeClient, NodeStatus, RawEvent, RawEventAttribute, RawTx,
    RawTxResult, Store, TxSearchResponse,
};

// =============================================================================
// Static Enqueuer
// =============================================================================

/// Emits a fixed job list and closes the channel.
pub(crate) struct StaticEnqueuer {
    jobs: Vec<EnqueueJob>,
}

impl StaticEnqueuer {
    pub(crate) fn both_facets(heights: &[u64]) -> Self {
        Self {
            jobs: heights
                .iter()
                .map(|&height| EnqueueJob {
                    height,
                    index_txs: true,
                    index_events: true,
                })
                .collect(),
        }
    }

    pub(crate) fn tx_only(heights: &[u64]) -> Self {
        Self {
            jobs: heights
                .iter()
                .map(|&height| EnqueueJob {
                    height,
                    index_txs: true,
                    index_events: false,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl BlockEnqueuer for StaticEnqueuer {
    async fn enqueue(&self, jobs: mpsc::Sender<EnqueueJob>) -> IndexerResult<()> {
        for job in &self.jobs {
            if jobs.send(*job).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Mock Node Client
// =============================================================================

/// Canned per-height node responses with injectable failures.
#[derive(Default)]
pub(crate) struct MockNodeClient {
    pub(crate) blocks: HashMap<u64, BlockData>,
    pub(crate) results: HashMap<u64, BlockResultsData>,
    pub(crate) tx_responses: HashMap<u64, TxSearchResponse>,
    pub(crate) fail_blocks: HashSet<u64>,
    pub(crate) fail_results: HashSet<u64>,
    pub(crate) fail_tx_search: HashSet<u64>,
    /// Synthesize empty blocks for any height up to this one.
    pub(crate) generate_up_to: Option<u64>,
    pub(crate) tip: u64,
}

fn block_time(height: u64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + height as i64, 0).unwrap()
}

impl MockNodeClient {
    /// A client that serves empty blocks for every height up to `max`.
    pub(crate) fn generated(max: u64) -> Self {
        Self {
            generate_up_to: Some(max),
            tip: max,
            ..Default::default()
        }
    }

    fn synth_block(height: u64) -> BlockData {
        BlockData {
            height,
            hash: format!("{height:064X}"),
            time: block_time(height),
            proposer_address: "A0B1C2D3".into(),
            txs: Vec::new(),
        }
    }

    /// Register a full fixture for one height.
    ///
    /// Events are `(event_type, [(key, value)])` pairs; tx results and the
    /// tx-search response are derived so all three node calls agree.
    pub(crate) fn add_block(
        &mut self,
        height: u64,
        txs: Vec<RawTx>,
        begin_events: Vec<(&str, Vec<(&str, &str)>)>,
        end_events: Vec<(&str, Vec<(&str, &str)>)>,
    ) {
        let to_raw = |events: Vec<(&str, Vec<(&str, &str)>)>| -> Vec<RawEvent> {
            events
                .into_iter()
                .map(|(event_type, attrs)| RawEvent {
                    event_type: event_type.into(),
                    attributes: attrs
                        .into_iter()
                        .map(|(k, v)| RawEventAttribute {
                            key: k.into(),
                            value: v.into(),
                        })
                        .collect(),
                })
                .collect()
        };

        let tx_results: Vec<RawTxResult> = txs
            .iter()
            .map(|_| RawTxResult {
                code: 0,
                log: String::new(),
                events: Vec::new(),
            })
            .collect();

        self.tx_responses.insert(
            height,
            TxSearchResponse {
                txs: txs
                    .iter()
                    .cloned()
                    .zip(tx_results.iter().cloned())
                    .map(|(tx, result)| FetchedTx { tx, result })
                    .collect(),
            },
        );

        self.results.insert(
            height,
            BlockResultsData {
                height,
                begin_block_events: to_raw(begin_events),
                end_block_events: to_raw(end_events),
                tx_results,
            },
        );

        let mut block = Self::synth_block(height);
        block.txs = txs;
        self.blocks.insert(height, block);
        self.tip = self.tip.max(height);
    }
}

#[async_trait]
impl NodeClient for MockNodeClient {
    async fn block_by_height(&self, height: u64) -> ChainResult<BlockData> {
        if self.fail_blocks.contains(&height) {
            return Err(ChainError::RpcError(format!("block {height} unavailable")));
        }
        if let Some(block) = self.blocks.get(&height) {
            return Ok(block.clone());
        }
        match self.generate_up_to {
            Some(max) if height <= max => Ok(Self::synth_block(height)),
            _ => Err(ChainError::RpcError(format!("unknown height {height}"))),
        }
    }

    async fn block_results_by_height(&self, height: u64) -> ChainResult<BlockResultsData> {
        if self.fail_results.contains(&height) {
            return Err(ChainError::RpcError(format!(
                "block results {height} unavailable"
            )));
        }
        if let Some(results) = self.results.get(&height) {
            return Ok(results.clone());
        }
        Ok(BlockResultsData {
            height,
            begin_block_events: Vec::new(),
            end_block_events: Vec::new(),
            tx_results: Vec::new(),
        })
    }

    async fn tx_search(&self, height: u64) -> ChainResult<TxSearchResponse> {
        if self.fail_tx_search.contains(&height) {
            return Err(ChainError::RpcError(format!(
                "tx search {height} unavailable"
            )));
        }
        if let Some(response) = self.tx_responses.get(&height) {
            return Ok(response.clone());
        }
        Ok(TxSearchResponse { txs: Vec::new() })
    }

    async fn status(&self) -> ChainResult<NodeStatus> {
        Ok(NodeStatus {
            latest_block_height: self.tip,
            catching_up: false,
        })
    }
}

// =============================================================================
// Recording Store
// =============================================================================

/// Everything the pipeline wrote, keyed for easy assertions.
#[derive(Default)]
pub(crate) struct StoreState {
    pub(crate) chains: Vec<(String, String)>,
    pub(crate) blocks: BTreeMap<u64, BlockRecord>,
    pub(crate) tx_batches: BTreeMap<u64, Vec<TxWrapper>>,
    pub(crate) event_batches: BTreeMap<u64, (Vec<EventWrapper>, Vec<EventWrapper>)>,
    pub(crate) failed_blocks: BTreeMap<u64, FailureReason>,
    pub(crate) failed_event_blocks: BTreeSet<u64>,
    pub(crate) message_parser_rows: HashMap<String, i64>,
    pub(crate) block_event_parser_rows: HashMap<String, (i64, LifecyclePosition)>,
    /// `(parser identifier, message db id, artifact payload)`
    pub(crate) custom_messages: Vec<(String, i64, serde_json::Value)>,
    /// `(parser identifier, event db id, artifact payload)`
    pub(crate) custom_events: Vec<(String, i64, serde_json::Value)>,
    pub(crate) custom_model_statements: Vec<String>,
    pub(crate) heights_by_msg_type: HashMap<String, Vec<u64>>,
    /// Count of mutating pipeline writes (bootstrap excluded).
    pub(crate) writes: u64,
    next_id: i64,
}

impl StoreState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory [`Store`] capturing all writes.
#[derive(Default)]
pub(crate) struct RecordingStore {
    pub(crate) state: Mutex<StoreState>,
    fail_new_block: Mutex<HashMap<u64, u32>>,
}

impl RecordingStore {
    /// Make the next `times` calls to `index_new_block` for `height` fail.
    pub(crate) fn fail_index_new_block(&self, height: u64, times: u32) {
        self.fail_new_block.lock().unwrap().insert(height, times);
    }
}

#[async_trait]
impl Store for RecordingStore {
    async fn upsert_chain(&self, chain_id: &str, chain_name: &str) -> StorageResult<i64> {
        let mut state = self.state.lock().unwrap();
        let entry = (chain_id.to_string(), chain_name.to_string());
        if !state.chains.contains(&entry) {
            state.chains.push(entry);
        }
        Ok(1)
    }

    async fn index_new_block(
        &self,
        block: &BlockRecord,
        txs: &[TxWrapper],
    ) -> StorageResult<IndexedTxDataset> {
        {
            let mut failures = self.fail_new_block.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&block.height) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StorageError::QueryError(format!(
                        "injected write failure for block {}",
                        block.height
                    )));
                }
            }
        }

        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        state.blocks.insert(block.height, block.clone());
        state.tx_batches.insert(block.height, txs.to_vec());

        let block_db_id = state.next_id();
        let mut indexed_txs = Vec::with_capacity(txs.len());
        for tx in txs {
            let tx_db_id = state.next_id();
            let mut messages = Vec::with_capacity(tx.messages.len());
            for message in &tx.messages {
                let db_id = state.next_id();
                messages.push(IndexedMessage {
                    db_id,
                    index: message.index,
                    type_url: message.type_url.clone(),
                    artifacts: message.artifacts.clone(),
                });
            }
            indexed_txs.push(IndexedTx {
                db_id: tx_db_id,
                hash: tx.hash.clone(),
                messages,
            });
        }

        Ok(IndexedTxDataset {
            block_db_id,
            txs: indexed_txs,
        })
    }

    async fn index_block_events(
        &self,
        batch: &EventBatch,
        dry_run: bool,
    ) -> StorageResult<IndexedEventDataset> {
        if dry_run {
            return Ok(IndexedEventDataset::default());
        }

        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        state.blocks.insert(batch.block.height, batch.block.clone());
        state.event_batches.insert(
            batch.block.height,
            (
                batch.begin_block_events.clone(),
                batch.end_block_events.clone(),
            ),
        );

        let block_db_id = state.next_id();
        let mut events = Vec::new();
        for event in batch
            .begin_block_events
            .iter()
            .chain(&batch.end_block_events)
        {
            let db_id = state.next_id();
            events.push(IndexedEvent {
                db_id,
                event_type: event.event_type.clone(),
                lifecycle: event.lifecycle,
                artifacts: event.artifacts.clone(),
            });
        }

        Ok(IndexedEventDataset {
            block_db_id,
            events,
        })
    }

    async fn index_custom_messages(
        &self,
        dataset: &IndexedTxDataset,
        trackers: &HashMap<String, MessageParserTracker>,
    ) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        for tx in &dataset.txs {
            for message in &tx.messages {
                for (identifier, payload) in &message.artifacts {
                    if !trackers.contains_key(identifier) {
                        return Err(StorageError::NotFound(format!(
                            "no tracker for parser {identifier}"
                        )));
                    }
                    state.writes += 1;
                    state.custom_messages.push((
                        identifier.clone(),
                        message.db_id,
                        payload.clone(),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn index_custom_block_events(
        &self,
        dataset: &IndexedEventDataset,
        begin_trackers: &HashMap<String, BlockEventParserTracker>,
        end_trackers: &HashMap<String, BlockEventParserTracker>,
    ) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        for event in &dataset.events {
            let trackers = match event.lifecycle {
                LifecyclePosition::BeginBlock => begin_trackers,
                LifecyclePosition::EndBlock => end_trackers,
            };
            for (identifier, payload) in &event.artifacts {
                if !trackers.contains_key(identifier) {
                    return Err(StorageError::NotFound(format!(
                        "no tracker for parser {identifier}"
                    )));
                }
                state.writes += 1;
                state
                    .custom_events
                    .push((identifier.clone(), event.db_id, payload.clone()));
            }
        }
        Ok(())
    }

    async fn upsert_failed_block(&self, failed: &FailedBlock) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        state.failed_blocks.insert(failed.height, failed.reason);
        Ok(())
    }

    async fn upsert_failed_event_block(&self, failed: &FailedBlock) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        state.failed_event_blocks.insert(failed.height);
        Ok(())
    }

    async fn find_or_create_custom_message_parsers(
        &self,
        trackers: &mut HashMap<String, MessageParserTracker>,
    ) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        for tracker in trackers.values_mut() {
            let id = match state.message_parser_rows.get(&tracker.identifier).copied() {
                Some(id) => id,
                None => {
                    let id = state.next_id();
                    state
                        .message_parser_rows
                        .insert(tracker.identifier.clone(), id);
                    id
                }
            };
            tracker.db_id = Some(id);
        }
        Ok(())
    }

    async fn find_or_create_custom_block_event_parsers(
        &self,
        trackers: &mut HashMap<String, BlockEventParserTracker>,
    ) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        for tracker in trackers.values_mut() {
            let existing = state
                .block_event_parser_rows
                .get(&tracker.identifier)
                .map(|&(id, _)| id);
            let id = match existing {
                Some(id) => id,
                None => {
                    let id = state.next_id();
                    state
                        .block_event_parser_rows
                        .insert(tracker.identifier.clone(), (id, tracker.lifecycle));
                    id
                }
            };
            tracker.db_id = Some(id);
        }
        Ok(())
    }

    async fn migrate_custom_models(&self, statements: &[String]) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .custom_model_statements
            .extend(statements.iter().cloned());
        Ok(())
    }

    async fn heights_for_message_type(
        &self,
        _chain_id: &str,
        msg_type_url: &str,
    ) -> StorageResult<Vec<u64>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .heights_by_msg_type
            .get(msg_type_url)
            .cloned()
            .unwrap_or_default())
    }
}
