//! The block-processing pipeline.
//!
//! A multi-stage producer/consumer topology over bounded channels:
//!
//! ```text
//! Enqueuer ──heights──▶ FetchPool (N) ──raw──▶ Processor ──┬─txs────▶ Committer ──▶ Store
//!                                                          └─events─▶
//! ```
//!
//! - [`enqueue`] - height production (default / file / reindex modes)
//! - [`fetch`] - N parallel RPC workers emitting raw bundles
//! - [`process`] - raw-to-wrapper transformation, filters, custom parsers
//! - [`commit`] - store writes with one-shot retry and health accounting
//! - [`builder`] - registration surface producing an immutable registry
//!
//! Every channel is bounded, so a stalled committer backpressures all the
//! way to the enqueuer. Shutdown is a close cascade: the enqueuer drops
//! the height sender, workers drain and exit, the raw channel closes, the
//! processor drains and drops its output senders, the committer drains and
//! returns. No ordering is guaranteed across heights; order within one
//! batch is preserved.

pub mod builder;
pub mod commit;
pub mod config;
pub mod enqueue;
pub mod fetch;
mod process;

#[cfg(test)]
pub(crate) mod testing;

pub use builder::{ParserRegistry, PipelineBuilder};
pub use commit::CommitterStats;
pub use config::{
    IndexerConfig, BATCH_CHANNEL_FACTOR, DEFAULT_RPC_WORKERS, ENQUEUE_CHANNEL_CAPACITY,
    MAX_RPC_WORKERS, RAW_CHANNEL_CAPACITY,
};
pub use enqueue::{BlockEnqueuer, DefaultEnqueuer, EnqueueJob, FileEnqueuer, ReindexEnqueuer};
pub use fetch::RawBundle;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::error::{IndexerError, IndexerResult};
use crate::models::ChainRef;
use crate::pipeline::commit::Committer;
use crate::pipeline::fetch::FetchPool;
use crate::pipeline::process::Processor;
use crate::ports::{NodeClient, Store};

/// An assembled, ready-to-run pipeline.
///
/// Produced by [`PipelineBuilder::build`]; consumed by [`Pipeline::run`].
pub struct Pipeline {
    config: IndexerConfig,
    registry: ParserRegistry,
    custom_models: Vec<String>,
    enqueuer: Box<dyn BlockEnqueuer>,
    client: Arc<dyn NodeClient>,
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("custom_models", &self.custom_models)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub(crate) fn assemble(
        config: IndexerConfig,
        registry: ParserRegistry,
        custom_models: Vec<String>,
        enqueuer: Box<dyn BlockEnqueuer>,
        client: Arc<dyn NodeClient>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            config,
            registry,
            custom_models,
            enqueuer,
            client,
            store,
        }
    }

    /// The frozen registry this pipeline will run with.
    pub fn registry(&self) -> &ParserRegistry {
        &self.registry
    }

    /// The validated configuration this pipeline will run with.
    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Bootstrap the store and run the pipeline to completion.
    ///
    /// Bootstrap (chain upsert, custom-model migration, parser tracker
    /// resolution) happens before any worker starts. The run ends when the
    /// enqueuer's source is exhausted and everything in flight has been
    /// committed or recorded as failed, or when a fatal error tears the
    /// stages down.
    ///
    /// Signalling `true` on the watch channel stops the enqueuer; work
    /// already in flight is drained normally, so cancellation never leaves
    /// half-written batches.
    pub async fn run(
        mut self,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> IndexerResult<CommitterStats> {
        // ── Bootstrap ────────────────────────────────────────────────────
        let chain_db_id = self
            .store
            .upsert_chain(&self.config.chain_id, &self.config.chain_name)
            .await?;
        let chain = ChainRef {
            db_id: chain_db_id,
            chain_id: self.config.chain_id.clone(),
            chain_name: self.config.chain_name.clone(),
        };
        debug!(chain = %chain.chain_id, db_id = chain_db_id, "chain row resolved");

        if !self.custom_models.is_empty() {
            self.store.migrate_custom_models(&self.custom_models).await?;
            info!(
                statements = self.custom_models.len(),
                "custom models migrated"
            );
        }

        if !self.registry.message_parser_trackers.is_empty() {
            self.store
                .find_or_create_custom_message_parsers(&mut self.registry.message_parser_trackers)
                .await?;
        }
        if !self.registry.begin_block_parser_trackers.is_empty() {
            self.store
                .find_or_create_custom_block_event_parsers(
                    &mut self.registry.begin_block_parser_trackers,
                )
                .await?;
        }
        if !self.registry.end_block_parser_trackers.is_empty() {
            self.store
                .find_or_create_custom_block_event_parsers(
                    &mut self.registry.end_block_parser_trackers,
                )
                .await?;
        }

        let registry = Arc::new(self.registry);

        // ── Channels ─────────────────────────────────────────────────────
        let (job_tx, job_rx) = mpsc::channel(ENQUEUE_CHANNEL_CAPACITY);
        let (raw_tx, raw_rx) = mpsc::channel(RAW_CHANNEL_CAPACITY);
        let batch_capacity = BATCH_CHANNEL_FACTOR * self.config.rpc_workers;
        let (tx_batch_tx, tx_batch_rx) = mpsc::channel(batch_capacity);
        let (event_batch_tx, event_batch_rx) = mpsc::channel(batch_capacity);

        info!(
            workers = self.config.rpc_workers,
            start = self.config.start_block,
            dry_run = self.config.dry_run,
            "starting pipeline"
        );

        // ── Stages ───────────────────────────────────────────────────────
        let enqueuer = self.enqueuer;
        let enqueue_handle = tokio::spawn(async move {
            tokio::select! {
                result = enqueuer.enqueue(job_tx) => result,
                _ = wait_for_shutdown(&mut shutdown_rx) => {
                    info!("shutdown requested, closing height feed");
                    Ok(())
                }
            }
        });

        let fetch_handle = FetchPool::new(
            self.client.clone(),
            self.store.clone(),
            chain.clone(),
            self.config.rpc_workers,
        )
        .spawn(job_rx, raw_tx);

        let processor = Processor {
            registry: registry.clone(),
            store: self.store.clone(),
            chain,
        };
        let process_handle =
            tokio::spawn(processor.run(raw_rx, tx_batch_tx, event_batch_tx));

        let committer = Committer {
            store: self.store.clone(),
            registry,
            dry_run: self.config.dry_run,
            block_timer: self.config.block_timer,
        };
        let commit_handle = tokio::spawn(committer.run(tx_batch_rx, event_batch_rx));

        // ── Join ─────────────────────────────────────────────────────────
        let enqueue_result = flatten(enqueue_handle.await);
        let fetch_result = flatten(fetch_handle.await);
        let process_result = flatten(process_handle.await);
        let commit_result = flatten(commit_handle.await);

        // The committer's error is the most meaningful one when several
        // stages unwound together.
        let stats = commit_result?;
        fetch_result?;
        process_result?;
        enqueue_result?;

        info!(
            blocks = stats.blocks_processed,
            writes = stats.db_writes,
            reattempts = stats.db_reattempts,
            "pipeline drained"
        );
        Ok(stats)
    }
}

/// Resolve once the shutdown flag flips to `true`.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            // Sender gone without signalling: never trigger.
            std::future::pending::<()>().await;
        }
    }
}

fn flatten<T>(joined: Result<IndexerResult<T>, tokio::task::JoinError>) -> IndexerResult<T> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(IndexerError::Internal(format!("pipeline task panicked: {e}"))),
    }
}
