//! The RPC fetch pool.
//!
//! N workers consume height jobs from a shared receiver and emit
//! [`RawBundle`]s onto the bounded raw channel. Each worker performs the
//! minimum set of node calls the job's flags require; a block fetch
//! failure records the height as failed and drops the job, while partial
//! failures (results, tx search) set the corresponding bit so the
//! processor can skip just that facet.
//!
//! A supervisor task awaits every worker. The raw channel closes when the
//! last worker drops its sender clone.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::IndexerResult;
use crate::metrics::{record_block_fetched, record_failed_block, record_fetch_error};
use crate::models::{ChainRef, FailedBlock, FailureReason};
use crate::pipeline::enqueue::{retry_on_eof, EnqueueJob};
use crate::ports::{BlockData, BlockResultsData, NodeClient, Store, TxSearchResponse};

/// Raw per-height data fetched from the node, consumed once by the
/// processor.
#[derive(Debug, Clone)]
pub struct RawBundle {
    /// Height this bundle covers.
    pub height: u64,
    /// Block header and body.
    pub block_data: BlockData,
    /// Block results, when fetched.
    pub results_data: Option<BlockResultsData>,
    /// Batched tx-search response, when available.
    pub tx_response: Option<TxSearchResponse>,
    /// Whether the job requested transaction indexing.
    pub index_txs: bool,
    /// Whether the job requested block event indexing.
    pub index_events: bool,
    /// No transaction source could be fetched.
    pub tx_fetch_failed: bool,
    /// Block results could not be fetched.
    pub event_fetch_failed: bool,
}

/// Pool of RPC fetch workers.
pub struct FetchPool {
    client: Arc<dyn NodeClient>,
    store: Arc<dyn Store>,
    chain: ChainRef,
    workers: usize,
}

impl FetchPool {
    pub fn new(
        client: Arc<dyn NodeClient>,
        store: Arc<dyn Store>,
        chain: ChainRef,
        workers: usize,
    ) -> Self {
        Self {
            client,
            store,
            chain,
            workers,
        }
    }

    /// Spawn the workers and a supervisor awaiting them all.
    ///
    /// The returned handle resolves once every worker has exited; the raw
    /// channel closes at that point because no sender clone outlives the
    /// workers. The first worker error (failed failure-bookkeeping write)
    /// is surfaced.
    pub(crate) fn spawn(
        self,
        jobs: mpsc::Receiver<EnqueueJob>,
        raw_tx: mpsc::Sender<RawBundle>,
    ) -> JoinHandle<IndexerResult<()>> {
        let jobs = Arc::new(Mutex::new(jobs));

        let handles: Vec<JoinHandle<IndexerResult<()>>> = (0..self.workers)
            .map(|worker_id| {
                let client = self.client.clone();
                let store = self.store.clone();
                let chain = self.chain.clone();
                let jobs = jobs.clone();
                let raw_tx = raw_tx.clone();
                tokio::spawn(async move {
                    worker(worker_id, client, store, chain, jobs, raw_tx).await
                })
            })
            .collect();

        // The workers own the only sender clones past this point.
        drop(raw_tx);

        tokio::spawn(async move {
            let mut first_error = None;
            for handle in handles {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(error = %e, "fetch worker failed");
                        first_error.get_or_insert(e);
                    }
                    Err(e) => {
                        error!(error = %e, "fetch worker panicked");
                        first_error.get_or_insert(crate::error::IndexerError::Internal(format!(
                            "fetch worker panicked: {e}"
                        )));
                    }
                }
            }
            debug!("fetch pool drained");
            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }
}

async fn worker(
    worker_id: usize,
    client: Arc<dyn NodeClient>,
    store: Arc<dyn Store>,
    chain: ChainRef,
    jobs: Arc<Mutex<mpsc::Receiver<EnqueueJob>>>,
    raw_tx: mpsc::Sender<RawBundle>,
) -> IndexerResult<()> {
    loop {
        // Holding the lock across recv serializes job hand-off only; the
        // fetches below run outside it.
        let job = { jobs.lock().await.recv().await };
        let Some(job) = job else {
            debug!(worker_id, "height channel drained, worker exiting");
            return Ok(());
        };

        let height = job.height;

        let block_data = match retry_on_eof(|| client.block_by_height(height)).await {
            Ok(data) => data,
            Err(e) => {
                warn!(height, error = %e, "block fetch failed");
                record_fetch_error("block");
                record_failed_block(FailureReason::FetchFailed);
                store
                    .upsert_failed_block(&FailedBlock {
                        height,
                        chain_id: chain.chain_id.clone(),
                        chain_name: chain.chain_name.clone(),
                        reason: FailureReason::FetchFailed,
                    })
                    .await?;
                continue;
            }
        };
        record_block_fetched();

        let mut bundle = RawBundle {
            height,
            block_data,
            results_data: None,
            tx_response: None,
            index_txs: job.index_txs,
            index_events: job.index_events,
            tx_fetch_failed: false,
            event_fetch_failed: false,
        };

        if job.index_events {
            match retry_on_eof(|| client.block_results_by_height(height)).await {
                Ok(results) => bundle.results_data = Some(results),
                Err(e) => {
                    warn!(height, error = %e, "block results fetch failed");
                    record_fetch_error("block_results");
                    record_failed_block(FailureReason::FetchFailed);
                    bundle.event_fetch_failed = true;
                    // The bundle still ships so the tx facet can proceed,
                    // but the event facet must not vanish without a trace.
                    store
                        .upsert_failed_event_block(&FailedBlock {
                            height,
                            chain_id: chain.chain_id.clone(),
                            chain_name: chain.chain_name.clone(),
                            reason: FailureReason::FetchFailed,
                        })
                        .await?;
                }
            }
        }

        if job.index_txs {
            match retry_on_eof(|| client.tx_search(height)).await {
                Ok(response) => bundle.tx_response = Some(response),
                Err(e) => {
                    warn!(height, error = %e, "tx search failed, falling back to block results");
                    record_fetch_error("tx_search");
                    if bundle.results_data.is_none() {
                        match retry_on_eof(|| client.block_results_by_height(height)).await {
                            Ok(results) => bundle.results_data = Some(results),
                            Err(e) => {
                                warn!(height, error = %e, "block results fallback failed");
                                record_fetch_error("block_results");
                                record_failed_block(FailureReason::FetchFailed);
                                bundle.tx_fetch_failed = true;
                                store
                                    .upsert_failed_block(&FailedBlock {
                                        height,
                                        chain_id: chain.chain_id.clone(),
                                        chain_name: chain.chain_name.clone(),
                                        reason: FailureReason::FetchFailed,
                                    })
                                    .await?;
                            }
                        }
                    }
                }
            }
        }

        if raw_tx.send(bundle).await.is_err() {
            debug!(worker_id, "raw channel closed, worker exiting");
            return Ok(());
        }
    }
}
