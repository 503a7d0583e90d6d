//! Height enqueueing.
//!
//! The enqueuer is the pipeline's producer: it yields [`EnqueueJob`]s onto
//! the bounded height channel until its source is exhausted, then closes
//! the channel by dropping the sole sender. Three built-in modes exist;
//! an embedder can supersede mode selection with a custom implementation
//! via [`crate::pipeline::PipelineBuilder::enqueuer`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{ChainResult, IndexerError, IndexerResult};
use crate::pipeline::config::IndexerConfig;
use crate::ports::{NodeClient, Store};

/// One unit of work for the fetch pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueJob {
    /// Height to index.
    pub height: u64,
    /// Whether to fetch and parse transactions.
    pub index_txs: bool,
    /// Whether to fetch and parse block events.
    pub index_events: bool,
}

/// Source of heights to index.
///
/// Implementations must send until exhausted and then return; the channel
/// closes when the sender is dropped. Sends block when the pipeline is
/// saturated; that backpressure is the designed flow control. A failed
/// send means the pipeline is shutting down and is not an error.
#[async_trait]
pub trait BlockEnqueuer: Send + Sync {
    /// Produce jobs onto the channel until the source is exhausted.
    async fn enqueue(&self, jobs: mpsc::Sender<EnqueueJob>) -> IndexerResult<()>;
}

/// Retry an `EOF`-suffixed node error once before surfacing it.
///
/// This error pops up from time to time and is unpredictable; it is most
/// likely transient on the node side, so one immediate retry usually
/// clears it.
pub(crate) async fn retry_on_eof<T, F, Fut>(op: F) -> ChainResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = ChainResult<T>>,
{
    match op().await {
        Err(e) if e.is_eof() => op().await,
        other => other,
    }
}

// =============================================================================
// Default Mode
// =============================================================================

/// Walk from the configured start height toward the chain tip.
///
/// When `exit_when_caught_up` is unset, keeps polling the node for new
/// heights and runs indefinitely.
pub struct DefaultEnqueuer {
    client: Arc<dyn NodeClient>,
    config: IndexerConfig,
}

impl DefaultEnqueuer {
    pub fn new(client: Arc<dyn NodeClient>, config: IndexerConfig) -> Self {
        Self { client, config }
    }

    /// Block until the node reports it is done catching up.
    async fn wait_for_chain(&self) -> IndexerResult<()> {
        loop {
            let status = match self.client.status().await {
                Ok(status) => status,
                Err(e) if e.is_eof() => {
                    tokio::time::sleep(self.config.wait_for_chain_delay).await;
                    self.client.status().await.map_err(IndexerError::from)?
                }
                Err(e) => return Err(e.into()),
            };

            if !status.catching_up {
                return Ok(());
            }

            debug!("Chain is still catching up, waiting");
            tokio::time::sleep(self.config.wait_for_chain_delay).await;
        }
    }
}

#[async_trait]
impl BlockEnqueuer for DefaultEnqueuer {
    async fn enqueue(&self, jobs: mpsc::Sender<EnqueueJob>) -> IndexerResult<()> {
        if self.config.wait_for_chain {
            self.wait_for_chain().await?;
        }

        let mut current = self.config.start_block;

        loop {
            let status = retry_on_eof(|| self.client.status()).await?;
            let tip = status.latest_block_height;
            let limit = match self.config.end_block {
                Some(end) => end.min(tip),
                None => tip,
            };

            while current <= limit {
                let job = EnqueueJob {
                    height: current,
                    index_txs: self.config.index_transactions,
                    index_events: self.config.index_block_events,
                };
                if jobs.send(job).await.is_err() {
                    debug!("height channel closed, stopping enqueue");
                    return Ok(());
                }
                current += 1;
            }

            if let Some(end) = self.config.end_block {
                if current > end {
                    info!(end, "reached configured end block");
                    return Ok(());
                }
            }

            if self.config.exit_when_caught_up && current > tip {
                info!(tip, "caught up to chain tip");
                return Ok(());
            }

            tokio::time::sleep(self.config.tip_poll_interval).await;
        }
    }
}

// =============================================================================
// File Mode
// =============================================================================

/// Read heights from a newline-delimited file, in the order given.
///
/// Duplicates are allowed and re-processed.
pub struct FileEnqueuer {
    path: PathBuf,
    index_txs: bool,
    index_events: bool,
}

impl FileEnqueuer {
    pub fn new(path: PathBuf, config: &IndexerConfig) -> Self {
        Self {
            path,
            index_txs: config.index_transactions,
            index_events: config.index_block_events,
        }
    }
}

#[async_trait]
impl BlockEnqueuer for FileEnqueuer {
    async fn enqueue(&self, jobs: mpsc::Sender<EnqueueJob>) -> IndexerResult<()> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            IndexerError::Config(format!(
                "failed to read block input file {}: {e}",
                self.path.display()
            ))
        })?;

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let height: u64 = line.parse().map_err(|_| {
                IndexerError::Config(format!(
                    "invalid height \"{line}\" in {}",
                    self.path.display()
                ))
            })?;

            let job = EnqueueJob {
                height,
                index_txs: self.index_txs,
                index_events: self.index_events,
            };
            if jobs.send(job).await.is_err() {
                debug!("height channel closed, stopping enqueue");
                return Ok(());
            }
        }

        Ok(())
    }
}

// =============================================================================
// Reindex Mode
// =============================================================================

/// Re-enqueue heights that historically contained a given message type.
///
/// Only the transaction facet is requested; block events for these heights
/// were already handled on the first pass.
pub struct ReindexEnqueuer {
    store: Arc<dyn Store>,
    chain_id: String,
    message_type: String,
}

impl ReindexEnqueuer {
    pub fn new(store: Arc<dyn Store>, chain_id: String, message_type: String) -> Self {
        Self {
            store,
            chain_id,
            message_type,
        }
    }
}

#[async_trait]
impl BlockEnqueuer for ReindexEnqueuer {
    async fn enqueue(&self, jobs: mpsc::Sender<EnqueueJob>) -> IndexerResult<()> {
        let heights = self
            .store
            .heights_for_message_type(&self.chain_id, &self.message_type)
            .await?;

        info!(
            heights = heights.len(),
            message_type = %self.message_type,
            "reindexing heights containing message type"
        );

        for height in heights {
            let job = EnqueueJob {
                height,
                index_txs: true,
                index_events: false,
            };
            if jobs.send(job).await.is_err() {
                debug!("height channel closed, stopping enqueue");
                return Ok(());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use crate::error::{ChainError, ChainResult};
    use crate::ports::{BlockData, BlockResultsData, NodeStatus, TxSearchResponse};

    struct StatusClient {
        calls: AtomicU32,
        catching_up_for: u32,
        tip: u64,
    }

    #[async_trait]
    impl NodeClient for StatusClient {
        async fn block_by_height(&self, _height: u64) -> ChainResult<BlockData> {
            unimplemented!("not used by the enqueuer")
        }

        async fn block_results_by_height(&self, _height: u64) -> ChainResult<BlockResultsData> {
            unimplemented!("not used by the enqueuer")
        }

        async fn tx_search(&self, _height: u64) -> ChainResult<TxSearchResponse> {
            unimplemented!("not used by the enqueuer")
        }

        async fn status(&self) -> ChainResult<NodeStatus> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(NodeStatus {
                latest_block_height: self.tip,
                catching_up: call < self.catching_up_for,
            })
        }
    }

    fn config(start: u64, end: Option<u64>) -> IndexerConfig {
        IndexerConfig {
            chain_id: "testchain-1".into(),
            chain_name: "testchain".into(),
            start_block: start,
            end_block: end,
            exit_when_caught_up: true,
            wait_for_chain_delay: Duration::from_millis(1),
            tip_poll_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    async fn drain(mut rx: mpsc::Receiver<EnqueueJob>) -> Vec<u64> {
        let mut heights = Vec::new();
        while let Some(job) = rx.recv().await {
            heights.push(job.height);
        }
        heights
    }

    #[tokio::test]
    async fn default_mode_walks_start_to_end() {
        let client = Arc::new(StatusClient {
            calls: AtomicU32::new(0),
            catching_up_for: 0,
            tip: 110,
        });
        let enqueuer = DefaultEnqueuer::new(client, config(100, Some(105)));

        let (tx, rx) = mpsc::channel(16);
        let drained = tokio::spawn(drain(rx));
        enqueuer.enqueue(tx).await.unwrap();

        assert_eq!(drained.await.unwrap(), vec![100, 101, 102, 103, 104, 105]);
    }

    #[tokio::test]
    async fn default_mode_stops_at_tip_when_caught_up() {
        let client = Arc::new(StatusClient {
            calls: AtomicU32::new(0),
            catching_up_for: 0,
            tip: 103,
        });
        let enqueuer = DefaultEnqueuer::new(client, config(100, None));

        let (tx, rx) = mpsc::channel(16);
        let drained = tokio::spawn(drain(rx));
        enqueuer.enqueue(tx).await.unwrap();

        assert_eq!(drained.await.unwrap(), vec![100, 101, 102, 103]);
    }

    #[tokio::test]
    async fn default_mode_waits_for_chain_sync() {
        let client = Arc::new(StatusClient {
            calls: AtomicU32::new(0),
            catching_up_for: 3,
            tip: 101,
        });
        let mut cfg = config(100, Some(101));
        cfg.wait_for_chain = true;
        let enqueuer = DefaultEnqueuer::new(client.clone(), cfg);

        let (tx, rx) = mpsc::channel(16);
        let drained = tokio::spawn(drain(rx));
        enqueuer.enqueue(tx).await.unwrap();

        assert_eq!(drained.await.unwrap(), vec![100, 101]);
        // Three catching-up probes plus the tip lookups afterwards
        assert!(client.calls.load(Ordering::SeqCst) > 3);
    }

    #[tokio::test]
    async fn file_mode_preserves_order_and_duplicates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "300\n100\n\n100\n200").unwrap();

        let enqueuer = FileEnqueuer::new(file.path().to_path_buf(), &config(1, None));

        let (tx, rx) = mpsc::channel(16);
        let drained = tokio::spawn(drain(rx));
        enqueuer.enqueue(tx).await.unwrap();

        assert_eq!(drained.await.unwrap(), vec![300, 100, 100, 200]);
    }

    #[tokio::test]
    async fn file_mode_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "100\nnot-a-height").unwrap();

        let enqueuer = FileEnqueuer::new(file.path().to_path_buf(), &config(1, None));

        let (tx, mut rx) = mpsc::channel(16);
        let err = enqueuer.enqueue(tx).await.unwrap_err();
        assert!(matches!(err, IndexerError::Config(_)));

        // The valid line before the garbage was still enqueued
        assert_eq!(rx.recv().await.unwrap().height, 100);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn reindex_mode_requests_tx_facet_only() {
        let store = Arc::new(crate::pipeline::testing::RecordingStore::default());
        store
            .state
            .lock()
            .unwrap()
            .heights_by_msg_type
            .insert("/cosmos.bank.v1beta1.MsgSend".into(), vec![10, 20]);

        let enqueuer = ReindexEnqueuer::new(
            store,
            "testchain-1".into(),
            "/cosmos.bank.v1beta1.MsgSend".into(),
        );

        let (tx, mut rx) = mpsc::channel(16);
        enqueuer.enqueue(tx).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(
            first,
            EnqueueJob {
                height: 10,
                index_txs: true,
                index_events: false,
            }
        );
        assert_eq!(rx.recv().await.unwrap().height, 20);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn eof_retry_retries_exactly_once() {
        let calls = AtomicU32::new(0);
        let result: ChainResult<u32> = retry_on_eof(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ChainError::RpcError("unexpected EOF".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Non-EOF errors surface immediately
        let calls = AtomicU32::new(0);
        let result: ChainResult<u32> = retry_on_eof(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ChainError::RpcError("connection refused".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
