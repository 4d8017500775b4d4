//! Batch state machine queries.
//!
//! A batch's lifecycle (`open -> sealed -> submitted -> l1_included ->
//! finalized`, with `reorged`/`failed` branches) is driven entirely through
//! these methods; nothing else touches the `batches` table.

use super::convert::{h256_from_hex, h256_to_hex, u256_from_sortable_hex, u256_to_sortable_hex};
use super::Store;
use crate::errors::StoreError;
use crate::types::{Batch, BatchState};
use ethers::types::{H256, U256};
use sqlx::Row;

impl Store {
    /// Seal a batch atomically: insert the `batches` row, pin every member
    /// transaction's `batch_id` and flip it to `batched`, then mark the
    /// batch itself `sealed`. All in one transaction so a crash mid-seal
    /// never leaves transactions pointing at a batch row that doesn't exist
    /// (spec.md §4.3 step 5).
    ///
    /// Returns `Ok(None)` if a batch with this `content_hash` already
    /// exists — the dedup case from spec.md §4.3 step 4, where an identical
    /// batch was already sealed (e.g. after a crash-restart replay).
    pub async fn seal_batch(&self, batch: &Batch) -> Result<Option<i64>, StoreError> {
        let mut txn = self.pool().begin().await.map_err(StoreError::from_sqlx)?;

        let content_hash_hex = h256_to_hex(batch.content_hash);
        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM batches WHERE content_hash = ?1")
            .bind(&content_hash_hex)
            .fetch_optional(&mut *txn)
            .await
            .map_err(StoreError::from_sqlx)?;
        if existing.is_some() {
            txn.rollback().await.map_err(StoreError::from_sqlx)?;
            return Ok(None);
        }

        let tx_hashes_json = serde_json::to_string(
            &batch.tx_hashes.iter().map(h256_to_hex).collect::<Vec<_>>(),
        )?;

        let id: i64 = sqlx::query(
            "INSERT INTO batches
                (content_hash, wire_format, state, sealed_at, blob_size, gas_bid, tx_count,
                 target_l1_block, tx_hashes)
             VALUES (?1, ?2, 'sealed', ?3, ?4, ?5, ?6, ?7, ?8)
             RETURNING id",
        )
        .bind(&content_hash_hex)
        .bind(&batch.wire_format)
        .bind(batch.sealed_at)
        .bind(batch.blob_size as i64)
        .bind(u256_to_sortable_hex(batch.gas_bid))
        .bind(batch.tx_count as i64)
        .bind(batch.target_l1_block as i64)
        .bind(&tx_hashes_json)
        .fetch_one(&mut *txn)
        .await
        .map_err(StoreError::from_sqlx)?
        .get("id");

        for hash in &batch.tx_hashes {
            sqlx::query("UPDATE transactions SET state = 'batched', batch_id = ?1 WHERE hash = ?2")
                .bind(id)
                .bind(h256_to_hex(*hash))
                .execute(&mut *txn)
                .await
                .map_err(StoreError::from_sqlx)?;
        }

        txn.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(Some(id))
    }

    pub async fn get_batch(&self, id: i64) -> Result<Option<Batch>, StoreError> {
        let row = sqlx::query(
            "SELECT id, content_hash, wire_format, state, sealed_at, blob_size, gas_bid, tx_count,
                    target_l1_block, tx_hashes
             FROM batches WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(StoreError::from_sqlx)?;

        row.as_ref().map(row_to_batch).transpose()
    }

    pub async fn set_batch_state(&self, id: i64, state: BatchState) -> Result<(), StoreError> {
        sqlx::query("UPDATE batches SET state = ?1 WHERE id = ?2")
            .bind(state.as_str())
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    /// A batch moves to `submitted` the moment its first Poster attempt is
    /// broadcast; member transactions follow to `submitted`.
    pub async fn mark_batch_submitted(&self, id: i64) -> Result<(), StoreError> {
        let mut txn = self.pool().begin().await.map_err(StoreError::from_sqlx)?;
        sqlx::query("UPDATE batches SET state = 'submitted' WHERE id = ?1")
            .bind(id)
            .execute(&mut *txn)
            .await
            .map_err(StoreError::from_sqlx)?;
        sqlx::query("UPDATE transactions SET state = 'submitted' WHERE batch_id = ?1")
            .bind(id)
            .execute(&mut *txn)
            .await
            .map_err(StoreError::from_sqlx)?;
        txn.commit().await.map_err(StoreError::from_sqlx)
    }

    /// A batch's attempt was mined: move the batch and its members to
    /// `l1_included` (spec.md §4.6, pre-finality).
    pub async fn mark_batch_l1_included(&self, id: i64) -> Result<(), StoreError> {
        let mut txn = self.pool().begin().await.map_err(StoreError::from_sqlx)?;
        sqlx::query("UPDATE batches SET state = 'l1_included' WHERE id = ?1")
            .bind(id)
            .execute(&mut *txn)
            .await
            .map_err(StoreError::from_sqlx)?;
        sqlx::query("UPDATE transactions SET state = 'l1_included' WHERE batch_id = ?1 AND state != 'l2_included'")
            .bind(id)
            .execute(&mut *txn)
            .await
            .map_err(StoreError::from_sqlx)?;
        txn.commit().await.map_err(StoreError::from_sqlx)
    }

    /// Past the finality depth, an `l1_included` batch is `finalized` and
    /// is no longer subject to reorg handling (spec.md §4.6).
    pub async fn mark_batch_finalized(&self, id: i64) -> Result<(), StoreError> {
        self.set_batch_state(id, BatchState::Finalized).await
    }

    /// A reorg evicted this batch's commitment from the canonical chain:
    /// flip the batch to `reorged` and requeue every non-`l2_included`
    /// member so a future batch can re-include it (spec.md §4.5).
    pub async fn mark_batch_reorged(&self, id: i64) -> Result<(), StoreError> {
        let mut txn = self.pool().begin().await.map_err(StoreError::from_sqlx)?;
        sqlx::query("UPDATE batches SET state = 'reorged' WHERE id = ?1")
            .bind(id)
            .execute(&mut *txn)
            .await
            .map_err(StoreError::from_sqlx)?;
        sqlx::query(
            "UPDATE transactions SET state = 'requeued', batch_id = NULL
             WHERE batch_id = ?1 AND state != 'l2_included'",
        )
        .bind(id)
        .execute(&mut *txn)
        .await
        .map_err(StoreError::from_sqlx)?;
        txn.commit().await.map_err(StoreError::from_sqlx)
    }

    /// Every Poster attempt for this batch hard-failed: mark the batch
    /// `failed`. Per spec.md §4.4, this does not auto-requeue members —
    /// it surfaces as a metric for operator intervention.
    pub async fn mark_batch_failed(&self, id: i64) -> Result<(), StoreError> {
        self.set_batch_state(id, BatchState::Failed).await
    }

    pub async fn batches_in_state(&self, state: BatchState) -> Result<Vec<Batch>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, content_hash, wire_format, state, sealed_at, blob_size, gas_bid, tx_count,
                    target_l1_block, tx_hashes
             FROM batches WHERE state = ?1 ORDER BY id ASC",
        )
        .bind(state.as_str())
        .fetch_all(self.pool())
        .await
        .map_err(StoreError::from_sqlx)?;

        rows.iter().map(row_to_batch).collect()
    }

    pub async fn count_batches_in_state(&self, state: BatchState) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM batches WHERE state = ?1")
            .bind(state.as_str())
            .fetch_one(self.pool())
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn last_sealed_at(&self) -> Result<Option<i64>, StoreError> {
        sqlx::query_scalar("SELECT MAX(sealed_at) FROM batches")
            .fetch_one(self.pool())
            .await
            .map_err(StoreError::from_sqlx)
    }
}

fn row_to_batch(row: &sqlx::sqlite::SqliteRow) -> Result<Batch, StoreError> {
    let content_hash_hex: String = row.get("content_hash");
    let state_text: String = row.get("state");
    let gas_bid_hex: String = row.get("gas_bid");
    let tx_hashes_json: String = row.get("tx_hashes");

    let tx_hashes: Vec<String> = serde_json::from_str(&tx_hashes_json)?;
    let tx_hashes: Vec<H256> = tx_hashes
        .iter()
        .map(|h| h256_from_hex(h))
        .collect::<Result<_, _>>()
        .map_err(|e| StoreError::Conflict(e.to_string()))?;

    Ok(Batch {
        id: row.get("id"),
        content_hash: h256_from_hex(&content_hash_hex).map_err(|e| StoreError::Conflict(e.to_string()))?,
        wire_format: row.get("wire_format"),
        state: BatchState::parse(&state_text).ok_or_else(|| StoreError::Conflict(format!("unknown batch state {state_text}")))?,
        sealed_at: row.get("sealed_at"),
        blob_size: row.get::<i64, _>("blob_size") as u64,
        gas_bid: u256_from_sortable_hex(&gas_bid_hex).map_err(|e| StoreError::Conflict(e.to_string()))?,
        tx_count: row.get::<i64, _>("tx_count") as usize,
        target_l1_block: row.get::<i64, _>("target_l1_block") as u64,
        tx_hashes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;
    use crate::types::PoolTransaction;
    use crate::types::TxKind;
    use ethers::types::Address;

    fn sample_batch(tx_hashes: Vec<H256>) -> Batch {
        Batch {
            id: 0,
            content_hash: H256::repeat_byte(0x42),
            wire_format: vec![0xaa, 0xbb],
            state: BatchState::Sealed,
            sealed_at: Some(1_700_000_000),
            blob_size: 1234,
            gas_bid: U256::from(2_000_000_000u64),
            tx_count: tx_hashes.len(),
            target_l1_block: 100,
            tx_hashes,
        }
    }

    async fn insert_member(store: &Store, hash: H256) {
        store
            .insert_transaction(&PoolTransaction {
                hash,
                raw: vec![0x01],
                from_address: Address::repeat_byte(0x01),
                nonce: 0,
                kind: TxKind::Eip1559,
                max_fee_per_gas: U256::from(100u64),
                max_priority_fee_per_gas: Some(U256::from(1u64)),
                gas_limit: 21_000,
                intrinsic_gas: 21_000,
                received_seq: 0,
                received_at: 1_700_000_000,
                state: TxState::Queued,
                batch_id: None,
                l2_block_number: None,
                l2_block_hash: None,
                drop_reason: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn seal_batch_pins_members_and_seals() {
        let store = test_store().await;
        let hash = H256::repeat_byte(0x01);
        insert_member(&store, hash).await;

        let batch = sample_batch(vec![hash]);
        let id = store.seal_batch(&batch).await.unwrap().unwrap();

        let fetched_batch = store.get_batch(id).await.unwrap().unwrap();
        assert_eq!(fetched_batch.state, BatchState::Sealed);

        let member = store.get_transaction(hash).await.unwrap().unwrap();
        assert_eq!(member.state, TxState::Batched);
        assert_eq!(member.batch_id, Some(id));
    }

    #[tokio::test]
    async fn seal_batch_is_idempotent_on_content_hash() {
        let store = test_store().await;
        let hash = H256::repeat_byte(0x02);
        insert_member(&store, hash).await;
        let batch = sample_batch(vec![hash]);

        let first = store.seal_batch(&batch).await.unwrap();
        assert!(first.is_some());
        let second = store.seal_batch(&batch).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn reorg_requeues_non_l2_included_members() {
        let store = test_store().await;
        let hash = H256::repeat_byte(0x03);
        insert_member(&store, hash).await;
        let batch = sample_batch(vec![hash]);
        let id = store.seal_batch(&batch).await.unwrap().unwrap();

        store.mark_batch_submitted(id).await.unwrap();
        store.mark_batch_reorged(id).await.unwrap();

        let batch_row = store.get_batch(id).await.unwrap().unwrap();
        assert_eq!(batch_row.state, BatchState::Reorged);
        let member = store.get_transaction(hash).await.unwrap().unwrap();
        assert_eq!(member.state, TxState::Requeued);
        assert_eq!(member.batch_id, None);
    }
}
