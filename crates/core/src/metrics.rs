//! Metrics definitions for the indexer.
//!
//! This module defines all metrics used throughout the pipeline.
//! Metrics are collected using the `metrics` crate and can be exported
//! to Prometheus via `metrics-exporter-prometheus`.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

use crate::models::FailureReason;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "blocks_fetched_total",
        "Total number of blocks fetched from the remote node"
    );
    describe_counter!(
        "fetch_errors_total",
        "Total number of remote node fetch errors"
    );
    describe_counter!(
        "parse_errors_total",
        "Total number of parse errors during block processing"
    );
    describe_counter!(
        "failed_blocks_total",
        "Total number of heights recorded as failed"
    );
    describe_counter!(
        "db_writes_total",
        "Total number of store write operations"
    );
    describe_counter!(
        "db_reattempts_total",
        "Total number of store writes that needed a reattempt"
    );
    describe_counter!(
        "blocks_committed_total",
        "Total number of blocks successfully committed"
    );
    describe_histogram!(
        "block_commit_duration_seconds",
        "Time taken to commit one batch in seconds"
    );
}

/// Record a block fetched from the node.
pub fn record_block_fetched() {
    counter!("blocks_fetched_total").increment(1);
}

/// Record a fetch error.
///
/// # Arguments
/// * `call` - The failing node call ("block", "block_results", "tx_search")
pub fn record_fetch_error(call: &str) {
    counter!("fetch_errors_total", "call" => call.to_string()).increment(1);
}

/// Record a parse error.
///
/// # Arguments
/// * `path` - The failing path ("block", "txs" or "events")
pub fn record_parse_error(path: &str) {
    counter!("parse_errors_total", "path" => path.to_string()).increment(1);
}

/// Record a height written to the failed-block bookkeeping.
pub fn record_failed_block(reason: FailureReason) {
    counter!("failed_blocks_total", "reason" => reason.as_str()).increment(1);
}

/// Record a store write.
pub fn record_db_write() {
    counter!("db_writes_total").increment(1);
}

/// Record a store write reattempt.
pub fn record_db_reattempt() {
    counter!("db_reattempts_total").increment(1);
}

/// Record a successfully committed block.
pub fn record_block_committed() {
    counter!("blocks_committed_total").increment(1);
}

/// Record batch commit duration.
pub fn record_commit_duration(duration_secs: f64) {
    histogram!("block_commit_duration_seconds").record(duration_secs);
}

/// A timer that automatically records commit duration when dropped.
pub struct CommitTimer {
    start: Instant,
}

impl CommitTimer {
    /// Start a new commit timer.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for CommitTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CommitTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_commit_duration(duration);
    }
}
