//! Raw bundle processing.
//!
//! The processor is the single consumer of the raw channel. For each
//! bundle it builds the canonical [`BlockRecord`], then runs the event
//! and transaction paths independently: one facet failing does not stop
//! the other. Parsed batches flow to the committer over two typed
//! channels that close when the processor returns.
//!
//! The processor is order-agnostic: bundles arrive in whatever order the
//! fetch pool produced them.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::{IndexerResult, ParseError, ParseResult};
use crate::metrics::{record_failed_block, record_parse_error};
use crate::models::{
    BlockRecord, ChainRef, EventBatch, EventWrapper, FailedBlock, FailureReason,
    LifecyclePosition, MessageWrapper, ParserArtifacts, TxBatch, TxWrapper,
};
use crate::pipeline::builder::ParserRegistry;
use crate::pipeline::fetch::RawBundle;
use crate::ports::{BlockData, FetchedTx, RawEvent, Store};

pub(crate) struct Processor {
    pub(crate) registry: Arc<ParserRegistry>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) chain: ChainRef,
}

impl Processor {
    pub(crate) async fn run(
        self,
        mut raw_rx: mpsc::Receiver<RawBundle>,
        tx_out: mpsc::Sender<TxBatch>,
        event_out: mpsc::Sender<EventBatch>,
    ) -> IndexerResult<()> {
        while let Some(bundle) = raw_rx.recv().await {
            let height = bundle.height;
            debug!(height, "parsing block data");

            let block = match build_block_record(&self.chain, &bundle.block_data) {
                Ok(block) => block,
                Err(e) => {
                    error!(height, error = %e, "unprocessable block");
                    record_parse_error("block");
                    self.record_failed_block(height, FailureReason::UnprocessableTx)
                        .await?;
                    continue;
                }
            };

            if bundle.index_events && !bundle.event_fetch_failed {
                match self.process_block_events(&block, &bundle) {
                    Ok(batch) => {
                        if event_out.send(batch).await.is_err() {
                            debug!("event batch channel closed, stopping processor");
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        error!(height, error = %e, "block event handling failed");
                        record_parse_error("events");
                        self.record_failed_event_block(height).await?;
                    }
                }
            }

            if bundle.index_txs && !bundle.tx_fetch_failed {
                match self.process_txs(&block, &bundle) {
                    Ok(txs) => {
                        let batch = TxBatch {
                            block: block.clone(),
                            txs,
                        };
                        if tx_out.send(batch).await.is_err() {
                            debug!("tx batch channel closed, stopping processor");
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        error!(height, error = %e, "unprocessable transactions");
                        record_parse_error("txs");
                        self.record_failed_block(height, FailureReason::UnprocessableTx)
                            .await?;
                    }
                }
            }
        }

        debug!("raw channel drained, processor exiting");
        Ok(())
    }

    /// Transform block results into an event batch, applying custom
    /// parsers and the begin/end filter registries.
    fn process_block_events(
        &self,
        block: &BlockRecord,
        bundle: &RawBundle,
    ) -> ParseResult<EventBatch> {
        let results = bundle
            .results_data
            .as_ref()
            .ok_or_else(|| ParseError::MalformedEvent("block results missing".into()))?;

        let begin = self.transform_events(
            block,
            &results.begin_block_events,
            LifecyclePosition::BeginBlock,
        )?;
        let end = self.transform_events(
            block,
            &results.end_block_events,
            LifecyclePosition::EndBlock,
        )?;

        let begin = self.registry.begin_block_filters().filter_events(begin);
        let end = self.registry.end_block_filters().filter_events(end);

        Ok(EventBatch {
            block: block.clone(),
            begin_block_events: begin,
            end_block_events: end,
        })
    }

    fn transform_events(
        &self,
        block: &BlockRecord,
        raw_events: &[RawEvent],
        lifecycle: LifecyclePosition,
    ) -> ParseResult<Vec<EventWrapper>> {
        let mut events = Vec::with_capacity(raw_events.len());

        for raw in raw_events {
            let parsers = match lifecycle {
                LifecyclePosition::BeginBlock => {
                    self.registry.begin_block_event_parsers(&raw.event_type)
                }
                LifecyclePosition::EndBlock => {
                    self.registry.end_block_event_parsers(&raw.event_type)
                }
            };

            let mut artifacts = ParserArtifacts::new();
            for parser in parsers {
                let value = parser.parse(block, raw)?;
                artifacts.insert(parser.identifier().to_string(), value);
            }

            events.push(EventWrapper {
                event_type: raw.event_type.clone(),
                attributes: raw
                    .attributes
                    .iter()
                    .map(|a| (a.key.clone(), a.value.clone()))
                    .collect(),
                lifecycle,
                artifacts,
            });
        }

        Ok(events)
    }

    /// Parse the height's transactions from the preferred source.
    fn process_txs(&self, block: &BlockRecord, bundle: &RawBundle) -> ParseResult<Vec<TxWrapper>> {
        let fetched: Vec<FetchedTx> = if let Some(response) = &bundle.tx_response {
            debug!(height = block.height, "processing txs from tx search response");
            response.txs.clone()
        } else if let Some(results) = &bundle.results_data {
            debug!(height = block.height, "processing txs from block results");
            derive_txs(&bundle.block_data, results)?
        } else {
            return Err(ParseError::MalformedTx(
                "no transaction source available".into(),
            ));
        };

        let mut txs = Vec::with_capacity(fetched.len());
        for item in &fetched {
            txs.push(self.parse_tx(block, item)?);
        }
        Ok(txs)
    }

    fn parse_tx(&self, block: &BlockRecord, fetched: &FetchedTx) -> ParseResult<TxWrapper> {
        let filters = self.registry.message_type_filters();
        let mut messages = Vec::with_capacity(fetched.tx.messages.len());

        for (index, raw) in fetched.tx.messages.iter().enumerate() {
            if !crate::filters::should_index_message(filters, &raw.type_url) {
                debug!(type_url = %raw.type_url, "message filtered out");
                continue;
            }

            let mut artifacts = ParserArtifacts::new();
            for parser in self.registry.message_parsers(&raw.type_url) {
                let value = parser.parse(block, raw)?;
                artifacts.insert(parser.identifier().to_string(), value);
            }

            messages.push(MessageWrapper {
                index: index as u32,
                type_url: raw.type_url.clone(),
                body: raw.body.clone(),
                artifacts,
            });
        }

        Ok(TxWrapper {
            hash: fetched.tx.hash.clone(),
            code: fetched.result.code,
            memo: fetched.tx.memo.clone(),
            messages,
        })
    }

    async fn record_failed_block(&self, height: u64, reason: FailureReason) -> IndexerResult<()> {
        record_failed_block(reason);
        self.store
            .upsert_failed_block(&FailedBlock {
                height,
                chain_id: self.chain.chain_id.clone(),
                chain_name: self.chain.chain_name.clone(),
                reason,
            })
            .await?;
        Ok(())
    }

    async fn record_failed_event_block(&self, height: u64) -> IndexerResult<()> {
        record_failed_block(FailureReason::FailedEventHandling);
        self.store
            .upsert_failed_event_block(&FailedBlock {
                height,
                chain_id: self.chain.chain_id.clone(),
                chain_name: self.chain.chain_name.clone(),
                reason: FailureReason::FailedEventHandling,
            })
            .await?;
        Ok(())
    }
}

/// Pair the block body's transactions with their execution results.
///
/// Used when tx search is unavailable; results arrive in block order, so a
/// length mismatch means the two responses disagree about the block.
fn derive_txs(
    block_data: &BlockData,
    results: &crate::ports::BlockResultsData,
) -> ParseResult<Vec<FetchedTx>> {
    if block_data.txs.len() != results.tx_results.len() {
        return Err(ParseError::MalformedTx(format!(
            "block carries {} txs but results carry {}",
            block_data.txs.len(),
            results.tx_results.len()
        )));
    }

    Ok(block_data
        .txs
        .iter()
        .zip(&results.tx_results)
        .map(|(tx, result)| FetchedTx {
            tx: tx.clone(),
            result: result.clone(),
        })
        .collect())
}

/// Canonicalize a raw block header.
fn build_block_record(chain: &ChainRef, data: &BlockData) -> ParseResult<BlockRecord> {
    if data.hash.is_empty() {
        return Err(ParseError::MalformedBlock(format!(
            "block {} has no hash",
            data.height
        )));
    }

    Ok(BlockRecord {
        chain_db_id: chain.db_id,
        height: data.height,
        time: data.time,
        proposer_address: data.proposer_address.clone(),
        hash: data.hash.clone(),
    })
}
