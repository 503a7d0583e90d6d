//! Pipeline configuration and validation.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{IndexerError, IndexerResult};

/// Default number of RPC fetch workers.
pub const DEFAULT_RPC_WORKERS: usize = 4;

/// Upper bound on RPC fetch workers.
pub const MAX_RPC_WORKERS: usize = 64;

/// Capacity of the height job channel. Bounded so the queue never holds
/// one entry for every block of the chain.
pub const ENQUEUE_CHANNEL_CAPACITY: usize = 10_000;

/// Capacity of the raw bundle channel. Small on purpose: if the database
/// falls behind the node, fetching must stall rather than buffer.
pub const RAW_CHANNEL_CAPACITY: usize = 10;

/// Batch channel capacity per fetch worker.
pub const BATCH_CHANNEL_FACTOR: usize = 4;

/// Configuration for one indexing run.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Chain identifier (e.g. "cosmoshub-4").
    pub chain_id: String,
    /// Human-readable chain name.
    pub chain_name: String,
    /// Bech32 account prefix of the chain.
    pub account_prefix: String,
    /// First height to index. Zero is coerced to one.
    pub start_block: u64,
    /// Last height to index; `None` follows the chain tip.
    pub end_block: Option<u64>,
    /// Number of parallel fetch workers, clamped to `[1, 64]`.
    pub rpc_workers: usize,
    /// Reindex only heights containing this message type.
    pub reindex_message_type: Option<String>,
    /// Read heights from this newline-delimited file instead of walking.
    pub block_input_file: Option<PathBuf>,
    /// JSON filter file, merged with programmatic filter registrations.
    pub filter_file: Option<PathBuf>,
    /// Wait for the node to finish catching up before enqueueing.
    pub wait_for_chain: bool,
    /// Delay between catch-up status probes.
    pub wait_for_chain_delay: Duration,
    /// Stop once the tip is reached instead of following it.
    pub exit_when_caught_up: bool,
    /// Poll interval for new tip heights when following the chain.
    pub tip_poll_interval: Duration,
    /// Process everything but skip all store writes.
    pub dry_run: bool,
    /// Log throughput every this many blocks; zero disables.
    pub block_timer: u64,
    /// Index transactions.
    pub index_transactions: bool,
    /// Index begin/end block events.
    pub index_block_events: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chain_id: String::new(),
            chain_name: String::new(),
            account_prefix: "cosmos".to_string(),
            start_block: 1,
            end_block: None,
            rpc_workers: DEFAULT_RPC_WORKERS,
            reindex_message_type: None,
            block_input_file: None,
            filter_file: None,
            wait_for_chain: false,
            wait_for_chain_delay: Duration::from_secs(10),
            exit_when_caught_up: false,
            tip_poll_interval: Duration::from_secs(10),
            dry_run: false,
            block_timer: 0,
            index_transactions: true,
            index_block_events: true,
        }
    }
}

impl IndexerConfig {
    /// Validate and normalize the configuration.
    ///
    /// Coerces out-of-range values where the original intent is clear
    /// (worker counts, start height) and rejects contradictory settings.
    pub fn validate(&mut self) -> IndexerResult<()> {
        // 0 is an invalid starting block, set it to 1
        if self.start_block == 0 {
            self.start_block = 1;
        }

        if self.rpc_workers == 0 {
            self.rpc_workers = DEFAULT_RPC_WORKERS;
        } else if self.rpc_workers > MAX_RPC_WORKERS {
            self.rpc_workers = MAX_RPC_WORKERS;
        }

        if let Some(end) = self.end_block {
            if end < self.start_block {
                return Err(IndexerError::Config(format!(
                    "end block {} is below start block {}",
                    end, self.start_block
                )));
            }
        }

        if self.reindex_message_type.is_some() && self.block_input_file.is_some() {
            return Err(IndexerError::Config(
                "reindex-message-type and block-input-file are mutually exclusive".into(),
            ));
        }

        if self.chain_id.is_empty() {
            return Err(IndexerError::Config("chain-id is required".into()));
        }

        Ok(())
    }
}
