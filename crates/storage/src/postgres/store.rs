//! PostgreSQL implementation of the `Store` port.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use siphon_core::error::{StorageError, StorageResult};
use siphon_core::models::{
    BlockEventParserTracker, BlockRecord, EventBatch, EventWrapper, FailedBlock,
    LifecyclePosition, MessageParserTracker, TxWrapper,
};
use siphon_core::ports::{
    IndexedEvent, IndexedEventDataset, IndexedMessage, IndexedTx, IndexedTxDataset, Store,
};

use super::database::Database;

/// PostgreSQL store adapter.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_chain(&self, chain_id: &str, chain_name: &str) -> StorageResult<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO chains (chain_id, name)
            VALUES ($1, $2)
            ON CONFLICT (chain_id) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(chain_id)
        .bind(chain_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(row.0)
    }

    async fn index_new_block(
        &self,
        block: &BlockRecord,
        txs: &[TxWrapper],
    ) -> StorageResult<IndexedTxDataset> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        let block_db_id = upsert_block(&mut tx, block).await?;

        let mut indexed_txs = Vec::with_capacity(txs.len());
        for (tx_index, wrapper) in txs.iter().enumerate() {
            let tx_row: (i64,) = sqlx::query_as(
                r#"
                INSERT INTO txs (block_id, tx_index, hash, code, memo)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (block_id, tx_index) DO UPDATE SET
                    hash = EXCLUDED.hash,
                    code = EXCLUDED.code,
                    memo = EXCLUDED.memo
                RETURNING id
                "#,
            )
            .bind(block_db_id)
            .bind(tx_index as i32)
            .bind(&wrapper.hash)
            .bind(wrapper.code as i32)
            .bind(&wrapper.memo)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

            let mut messages = Vec::with_capacity(wrapper.messages.len());
            for message in &wrapper.messages {
                let msg_row: (i64,) = sqlx::query_as(
                    r#"
                    INSERT INTO messages (tx_id, message_index, type_url, body)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (tx_id, message_index) DO UPDATE SET
                        type_url = EXCLUDED.type_url,
                        body = EXCLUDED.body
                    RETURNING id
                    "#,
                )
                .bind(tx_row.0)
                .bind(message.index as i32)
                .bind(&message.type_url)
                .bind(&message.body)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| StorageError::QueryError(e.to_string()))?;

                messages.push(IndexedMessage {
                    db_id: msg_row.0,
                    index: message.index,
                    type_url: message.type_url.clone(),
                    artifacts: message.artifacts.clone(),
                });
            }

            indexed_txs.push(IndexedTx {
                db_id: tx_row.0,
                hash: wrapper.hash.clone(),
                messages,
            });
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

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
            debug!(height = batch.block.height, "dry run, skipping event writes");
            return Ok(IndexedEventDataset::default());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        let block_db_id = upsert_block(&mut tx, &batch.block).await?;

        // Event indices restart per lifecycle; (block, lifecycle, index)
        // is the natural key.
        let mut events = Vec::new();
        for (event_index, event) in batch.begin_block_events.iter().enumerate() {
            let indexed = insert_block_event(&mut tx, block_db_id, event_index, event).await?;
            events.push(indexed);
        }
        for (event_index, event) in batch.end_block_events.iter().enumerate() {
            let indexed = insert_block_event(&mut tx, block_db_id, event_index, event).await?;
            events.push(indexed);
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

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
        for tx in &dataset.txs {
            for message in &tx.messages {
                for (identifier, payload) in &message.artifacts {
                    let parser_id = trackers
                        .get(identifier)
                        .and_then(|t| t.db_id)
                        .ok_or_else(|| {
                            StorageError::NotFound(format!(
                                "no tracker row for message parser \"{identifier}\""
                            ))
                        })?;

                    sqlx::query(
                        r#"
                        INSERT INTO message_parser_artifacts (message_id, parser_id, payload)
                        VALUES ($1, $2, $3)
                        ON CONFLICT (message_id, parser_id) DO UPDATE SET
                            payload = EXCLUDED.payload
                        "#,
                    )
                    .bind(message.db_id)
                    .bind(parser_id)
                    .bind(payload)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::QueryError(e.to_string()))?;
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
        for event in &dataset.events {
            let trackers = match event.lifecycle {
                LifecyclePosition::BeginBlock => begin_trackers,
                LifecyclePosition::EndBlock => end_trackers,
            };
            for (identifier, payload) in &event.artifacts {
                let parser_id = trackers
                    .get(identifier)
                    .and_then(|t| t.db_id)
                    .ok_or_else(|| {
                        StorageError::NotFound(format!(
                            "no tracker row for block event parser \"{identifier}\""
                        ))
                    })?;

                sqlx::query(
                    r#"
                    INSERT INTO block_event_parser_artifacts (event_id, parser_id, payload)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (event_id, parser_id) DO UPDATE SET
                        payload = EXCLUDED.payload
                    "#,
                )
                .bind(event.db_id)
                .bind(parser_id)
                .bind(payload)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::QueryError(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn upsert_failed_block(&self, failed: &FailedBlock) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO failed_blocks (height, chain_id, chain_name, reason)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (chain_id, height) DO UPDATE SET
                reason = EXCLUDED.reason,
                failed_at = NOW()
            "#,
        )
        .bind(failed.height as i64)
        .bind(&failed.chain_id)
        .bind(&failed.chain_name)
        .bind(failed.reason.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn upsert_failed_event_block(&self, failed: &FailedBlock) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO failed_event_blocks (height, chain_id, chain_name, reason)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (chain_id, height) DO UPDATE SET
                reason = EXCLUDED.reason,
                failed_at = NOW()
            "#,
        )
        .bind(failed.height as i64)
        .bind(&failed.chain_id)
        .bind(&failed.chain_name)
        .bind(failed.reason.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn find_or_create_custom_message_parsers(
        &self,
        trackers: &mut HashMap<String, MessageParserTracker>,
    ) -> StorageResult<()> {
        for tracker in trackers.values_mut() {
            let row: (i64,) = sqlx::query_as(
                r#"
                INSERT INTO message_parsers (identifier)
                VALUES ($1)
                ON CONFLICT (identifier) DO UPDATE SET identifier = EXCLUDED.identifier
                RETURNING id
                "#,
            )
            .bind(&tracker.identifier)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

            tracker.db_id = Some(row.0);
        }
        Ok(())
    }

    async fn find_or_create_custom_block_event_parsers(
        &self,
        trackers: &mut HashMap<String, BlockEventParserTracker>,
    ) -> StorageResult<()> {
        for tracker in trackers.values_mut() {
            let row: (i64,) = sqlx::query_as(
                r#"
                INSERT INTO block_event_parsers (identifier, lifecycle)
                VALUES ($1, $2)
                ON CONFLICT (identifier) DO UPDATE SET lifecycle = EXCLUDED.lifecycle
                RETURNING id
                "#,
            )
            .bind(&tracker.identifier)
            .bind(tracker.lifecycle.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

            tracker.db_id = Some(row.0);
        }
        Ok(())
    }

    async fn migrate_custom_models(&self, statements: &[String]) -> StorageResult<()> {
        for statement in statements {
            sqlx::raw_sql(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::MigrationError(e.to_string()))?;
        }
        Ok(())
    }

    async fn heights_for_message_type(
        &self,
        chain_id: &str,
        msg_type_url: &str,
    ) -> StorageResult<Vec<u64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT b.height
            FROM blocks b
            JOIN chains c ON c.id = b.chain_id
            JOIN txs t ON t.block_id = b.id
            JOIN messages m ON m.tx_id = t.id
            WHERE c.chain_id = $1 AND m.type_url = $2
            ORDER BY b.height
            "#,
        )
        .bind(chain_id)
        .bind(msg_type_url)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(rows.into_iter().map(|(h,)| h as u64).collect())
    }
}

/// Upsert the block row inside an open transaction, returning its id.
///
/// Both the tx path and the event path go through this, so whichever
/// batch lands first creates the row and the second one is a no-op
/// update with identical values.
async fn upsert_block(
    tx: &mut Transaction<'_, Postgres>,
    block: &BlockRecord,
) -> StorageResult<i64> {
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO blocks (chain_id, height, time, proposer_address, hash)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (chain_id, height) DO UPDATE SET
            time = EXCLUDED.time,
            proposer_address = EXCLUDED.proposer_address,
            hash = EXCLUDED.hash
        RETURNING id
        "#,
    )
    .bind(block.chain_db_id)
    .bind(block.height as i64)
    .bind(block.time)
    .bind(&block.proposer_address)
    .bind(&block.hash)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| StorageError::QueryError(e.to_string()))?;

    Ok(row.0)
}

async fn insert_block_event(
    tx: &mut Transaction<'_, Postgres>,
    block_db_id: i64,
    event_index: usize,
    event: &EventWrapper,
) -> StorageResult<IndexedEvent> {
    // Attributes are stored as an ordered JSON array of pairs; jsonb
    // preserves array order.
    let attributes = serde_json::to_value(&event.attributes)
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO block_events (block_id, lifecycle, event_index, event_type, attributes)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (block_id, lifecycle, event_index) DO UPDATE SET
            event_type = EXCLUDED.event_type,
            attributes = EXCLUDED.attributes
        RETURNING id
        "#,
    )
    .bind(block_db_id)
    .bind(event.lifecycle.to_string())
    .bind(event_index as i32)
    .bind(&event.event_type)
    .bind(attributes)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| StorageError::QueryError(e.to_string()))?;

    Ok(IndexedEvent {
        db_id: row.0,
        event_type: event.event_type.clone(),
        lifecycle: event.lifecycle,
        artifacts: event.artifacts.clone(),
    })
}
