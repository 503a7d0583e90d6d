//! Batch committing.
//!
//! The committer is the pipeline's sink: a single consumer selecting
//! non-deterministically between the tx and event batch channels until
//! both close. Writes go through the store with exactly one reattempt; a
//! second failure is fatal and tears the pipeline down.
//!
//! The committer also owns the pipeline's health accounting: when
//! `block_timer` is set it logs throughput every that many blocks and
//! aborts if more than 10% of store writes needed a reattempt.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::{IndexerError, IndexerResult, StorageResult};
use crate::metrics::{
    record_block_committed, record_db_reattempt, record_db_write, CommitTimer,
};
use crate::models::{EventBatch, TxBatch};
use crate::pipeline::builder::ParserRegistry;
use crate::ports::Store;

/// Progress counters accumulated by the committer.
///
/// Dry runs produce the same counters as real runs; only the store
/// traffic differs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitterStats {
    /// Tx batches handled (one per block with transaction work).
    pub blocks_processed: u64,
    /// Batches received across both channels.
    pub db_writes: u64,
    /// Writes that needed the one-shot reattempt.
    pub db_reattempts: u64,
}

pub(crate) struct Committer {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) registry: Arc<ParserRegistry>,
    pub(crate) dry_run: bool,
    pub(crate) block_timer: u64,
}

impl Committer {
    pub(crate) async fn run(
        self,
        mut tx_rx: mpsc::Receiver<TxBatch>,
        mut event_rx: mpsc::Receiver<EventBatch>,
    ) -> IndexerResult<CommitterStats> {
        let mut stats = CommitterStats::default();
        let mut window_start = Instant::now();

        loop {
            tokio::select! {
                Some(batch) = tx_rx.recv() => {
                    stats.db_writes += 1;
                    record_db_write();
                    self.commit_txs(batch, &mut stats).await?;

                    stats.blocks_processed += 1;
                    record_block_committed();
                    self.check_health(&stats, &mut window_start)?;
                }
                Some(batch) = event_rx.recv() => {
                    stats.db_writes += 1;
                    record_db_write();
                    self.commit_events(batch, &mut stats).await?;
                }
                else => {
                    info!("batch channels drained, committer exiting");
                    break;
                }
            }
        }

        Ok(stats)
    }

    async fn commit_txs(&self, batch: TxBatch, stats: &mut CommitterStats) -> IndexerResult<()> {
        let height = batch.block.height;

        if self.dry_run {
            info!(height, txs = batch.txs.len(), "dry run, tx data will not be stored");
            return Ok(());
        }

        info!(height, txs = batch.txs.len(), "indexing transactions");
        let _timer = CommitTimer::new();

        let dataset = retry_once(stats, || self.store.index_new_block(&batch.block, &batch.txs))
            .await
            .map_err(|e| {
                error!(height, error = %e, "block write failed twice");
                IndexerError::Storage(e)
            })?;

        self.store
            .index_custom_messages(&dataset, self.registry.message_parser_trackers())
            .await
            .map_err(|e| {
                error!(height, error = %e, "custom message indexing failed");
                IndexerError::Storage(e)
            })?;

        Ok(())
    }

    async fn commit_events(
        &self,
        batch: EventBatch,
        stats: &mut CommitterStats,
    ) -> IndexerResult<()> {
        let height = batch.block.height;
        let num_events = batch.begin_block_events.len() + batch.end_block_events.len();

        info!(
            height,
            events = num_events,
            dry_run = self.dry_run,
            "indexing block events"
        );
        let _timer = CommitTimer::new();

        // The store short-circuits all writes when dry_run is set and
        // returns an empty dataset, which makes the custom indexing below
        // a no-op.
        let dataset = retry_once(stats, || self.store.index_block_events(&batch, self.dry_run))
            .await
            .map_err(|e| {
                error!(height, error = %e, "block event write failed twice");
                IndexerError::Storage(e)
            })?;

        self.store
            .index_custom_block_events(
                &dataset,
                self.registry.begin_block_parser_trackers(),
                self.registry.end_block_parser_trackers(),
            )
            .await
            .map_err(|e| {
                error!(height, error = %e, "custom block event indexing failed");
                IndexerError::Storage(e)
            })?;

        Ok(())
    }

    /// Throughput log and retry-ratio check, evaluated at `block_timer`
    /// boundaries only.
    fn check_health(
        &self,
        stats: &CommitterStats,
        window_start: &mut Instant,
    ) -> IndexerResult<()> {
        if self.block_timer == 0 || stats.blocks_processed % self.block_timer != 0 {
            return Ok(());
        }

        let elapsed = window_start.elapsed();
        info!(
            blocks = self.block_timer,
            seconds = elapsed.as_secs_f64(),
            total = stats.blocks_processed,
            "block throughput"
        );
        *window_start = Instant::now();

        if stats.db_writes > 0
            && stats.db_reattempts as f64 / stats.db_writes as f64 > 0.1
        {
            return Err(IndexerError::RetryRatioExceeded {
                reattempts: stats.db_reattempts,
                writes: stats.db_writes,
            });
        }

        Ok(())
    }
}

/// Do a single reattempt on failure.
async fn retry_once<T, F, Fut>(stats: &mut CommitterStats, op: F) -> StorageResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = StorageResult<T>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(first) => {
            stats.db_reattempts += 1;
            record_db_reattempt();
            warn!(error = %first, "store write failed, reattempting once");
            op().await
        }
    }
}
