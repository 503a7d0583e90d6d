//! CometBFT HTTP JSON-RPC client implementing the `NodeClient` port.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, trace};

use siphon_core::error::{ChainError, ChainResult};
use siphon_core::ports::{
    BlockData, BlockResultsData, FetchedTx, NodeClient, NodeStatus, RawTx, RawTxResult,
    TxSearchResponse,
};

use crate::decode::{messages_from_events, DecodedTx, TxDecoder};
use crate::types::{
    parse_height, parse_time, RpcEnvelope, WireBlockResponse, WireBlockResults, WireEvent,
    WireStatus, WireTxResult, WireTxSearch,
};

/// Tx search page size.
const TX_SEARCH_PER_PAGE: usize = 100;

/// Configuration for the node client.
#[derive(Debug, Clone)]
pub struct NodeClientConfig {
    /// Node RPC base URL (e.g. "http://localhost:26657").
    pub rpc_url: String,
    /// Bech32 account prefix of the chain.
    pub account_prefix: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for NodeClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:26657".to_string(),
            account_prefix: "cosmos".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP JSON-RPC adapter for a CometBFT node.
pub struct HttpNodeClient {
    http: reqwest::Client,
    config: NodeClientConfig,
    decoders: Vec<Arc<dyn TxDecoder>>,
}

impl HttpNodeClient {
    /// Build a client for the configured node.
    pub fn new(config: NodeClientConfig) -> ChainResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            http,
            config,
            decoders: Vec::new(),
        })
    }

    /// The account prefix this client was configured for.
    ///
    /// Decoders for address-bearing messages need it to render bech32
    /// addresses.
    pub fn account_prefix(&self) -> &str {
        &self.config.account_prefix
    }

    /// Register an additional module decoder.
    ///
    /// Decoders are tried in registration order; the first one that
    /// recognizes a payload wins.
    pub fn register_decoder(&mut self, decoder: Arc<dyn TxDecoder>) {
        self.decoders.push(decoder);
    }

    #[instrument(skip_all, fields(method))]
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> ChainResult<T> {
        trace!(%params, "rpc call");

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::RpcError(format!("{method} request failed: {e}")))?;

        let envelope: RpcEnvelope<T> = response
            .json()
            .await
            .map_err(|e| ChainError::DecodeError(format!("{method} response malformed: {e}")))?;

        if let Some(error) = envelope.error {
            return Err(error.into_chain_error());
        }
        envelope
            .result
            .ok_or_else(|| ChainError::DecodeError(format!("{method} response missing result")))
    }

    /// Decode one base64 transaction payload into a [`RawTx`].
    ///
    /// Registered decoders get first pick; `fallback_events` (the tx's
    /// execution events, when known) covers undecoded payloads.
    fn decode_tx(
        &self,
        base64_tx: &str,
        fallback_events: Option<&RawTxResult>,
    ) -> ChainResult<RawTx> {
        use base64::Engine as _;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(base64_tx)
            .map_err(|e| ChainError::DecodeError(format!("invalid tx payload: {e}")))?;

        let hash = hex::encode_upper(Sha256::digest(&bytes));

        let mut decoded: Option<DecodedTx> = None;
        for decoder in &self.decoders {
            if let Some(tx) = decoder.decode_tx(&bytes)? {
                decoded = Some(tx);
                break;
            }
        }

        let decoded = match decoded {
            Some(tx) => tx,
            None => DecodedTx {
                memo: String::new(),
                messages: fallback_events
                    .map(|result| messages_from_events(&result.events))
                    .unwrap_or_default(),
            },
        };

        Ok(RawTx {
            hash,
            memo: decoded.memo,
            messages: decoded.messages,
        })
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn block_by_height(&self, height: u64) -> ChainResult<BlockData> {
        let response: WireBlockResponse = self
            .call("block", json!({ "height": height.to_string() }))
            .await?;

        let header = &response.block.header;
        let mut txs = Vec::with_capacity(response.block.data.txs.len());
        for base64_tx in &response.block.data.txs {
            txs.push(self.decode_tx(base64_tx, None)?);
        }

        Ok(BlockData {
            height: parse_height(&header.height)?,
            hash: response.block_id.hash.clone(),
            time: parse_time(&header.time)?,
            proposer_address: header.proposer_address.clone(),
            txs,
        })
    }

    async fn block_results_by_height(&self, height: u64) -> ChainResult<BlockResultsData> {
        let results: WireBlockResults = self
            .call("block_results", json!({ "height": height.to_string() }))
            .await?;

        Ok(BlockResultsData {
            height: parse_height(&results.height)?,
            begin_block_events: results
                .begin_block_events
                .unwrap_or_default()
                .into_iter()
                .map(WireEvent::into_raw)
                .collect(),
            end_block_events: results
                .end_block_events
                .unwrap_or_default()
                .into_iter()
                .map(WireEvent::into_raw)
                .collect(),
            tx_results: results
                .txs_results
                .unwrap_or_default()
                .into_iter()
                .map(WireTxResult::into_raw)
                .collect(),
        })
    }

    async fn tx_search(&self, height: u64) -> ChainResult<TxSearchResponse> {
        let mut txs = Vec::new();
        let mut page = 1usize;

        loop {
            let search: WireTxSearch = self
                .call(
                    "tx_search",
                    json!({
                        "query": format!("tx.height={height}"),
                        "prove": false,
                        "page": page.to_string(),
                        "per_page": TX_SEARCH_PER_PAGE.to_string(),
                        "order_by": "asc",
                    }),
                )
                .await?;

            let total: usize = search
                .total_count
                .parse()
                .map_err(|_| ChainError::DecodeError("invalid tx_search total_count".into()))?;

            if search.txs.is_empty() {
                // Node reported more results than it returns; stop
                // rather than loop on empty pages.
                break;
            }

            for wire_tx in search.txs {
                let result = wire_tx.tx_result.into_raw();
                let mut tx = self.decode_tx(&wire_tx.tx, Some(&result))?;
                // Trust the node's hash over our own computation
                if !wire_tx.hash.is_empty() {
                    tx.hash = wire_tx.hash;
                }
                txs.push(FetchedTx { tx, result });
            }

            if txs.len() >= total {
                break;
            }
            page += 1;
        }

        debug!(height, txs = txs.len(), "tx search complete");
        Ok(TxSearchResponse { txs })
    }

    async fn status(&self) -> ChainResult<NodeStatus> {
        let status: WireStatus = self.call("status", json!({})).await?;
        Ok(NodeStatus {
            latest_block_height: parse_height(&status.sync_info.latest_block_height)?,
            catching_up: status.sync_info.catching_up,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_hash_is_sha256_of_payload() {
        let client = HttpNodeClient::new(NodeClientConfig::default()).unwrap();
        // base64("test")
        let tx = client.decode_tx("dGVzdA==", None).unwrap();
        assert_eq!(
            tx.hash,
            "9F86D081884C7D659A2FEAA0C55AD015A3BF4F1B2B0B822CD15D6C15B0F00A08"
        );
        assert!(tx.messages.is_empty());
    }

    #[test]
    fn undecoded_tx_falls_back_to_event_messages() {
        use siphon_core::ports::{RawEvent, RawEventAttribute};

        let client = HttpNodeClient::new(NodeClientConfig::default()).unwrap();
        let result = RawTxResult {
            code: 0,
            log: String::new(),
            events: vec![RawEvent {
                event_type: "message".into(),
                attributes: vec![RawEventAttribute {
                    key: "action".into(),
                    value: "/cosmos.bank.v1beta1.MsgSend".into(),
                }],
            }],
        };

        let tx = client.decode_tx("dGVzdA==", Some(&result)).unwrap();
        assert_eq!(tx.messages.len(), 1);
        assert_eq!(tx.messages[0].type_url, "/cosmos.bank.v1beta1.MsgSend");
    }

    struct StaticDecoder;

    impl TxDecoder for StaticDecoder {
        fn decode_tx(&self, _bytes: &[u8]) -> ChainResult<Option<DecodedTx>> {
            Ok(Some(DecodedTx {
                memo: "decoded".into(),
                messages: vec![],
            }))
        }
    }

    #[test]
    fn registered_decoder_wins_over_fallback() {
        let mut client = HttpNodeClient::new(NodeClientConfig::default()).unwrap();
        client.register_decoder(Arc::new(StaticDecoder));

        let tx = client.decode_tx("dGVzdA==", None).unwrap();
        assert_eq!(tx.memo, "decoded");
    }
}
