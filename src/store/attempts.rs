//! `post_attempts` append-only log queries.
//!
//! A batch can accumulate many attempts over its lifetime (one per RBF
//! tick); only one is ever "live" (status `pending`) at a time, with
//! superseded attempts chained through `replaced_by` (spec.md §4.4).

use super::convert::{h256_from_hex, h256_to_hex, u256_from_sortable_hex, u256_to_sortable_hex};
use super::Store;
use crate::errors::StoreError;
use crate::types::{AttemptStatus, PostAttempt};
use ethers::types::{H256, U256};
use sqlx::Row;

pub struct NewAttempt {
    pub batch_id: i64,
    pub l1_tx_hash: Option<H256>,
    pub aggregator_request_id: Option<String>,
    pub l1_nonce: u64,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub submitted_at: i64,
}

impl Store {
    pub async fn record_attempt(&self, attempt: &NewAttempt) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "INSERT INTO post_attempts
                (batch_id, l1_tx_hash, aggregator_request_id, l1_nonce, max_fee_per_gas,
                 max_priority_fee_per_gas, submitted_at, confirmed_at, block_number, block_hash,
                 status, replaced_by, failure_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL, NULL, 'pending', NULL, NULL)
             RETURNING id",
        )
        .bind(attempt.batch_id)
        .bind(attempt.l1_tx_hash.map(h256_to_hex))
        .bind(&attempt.aggregator_request_id)
        .bind(attempt.l1_nonce as i64)
        .bind(u256_to_sortable_hex(attempt.max_fee_per_gas))
        .bind(u256_to_sortable_hex(attempt.max_priority_fee_per_gas))
        .bind(attempt.submitted_at)
        .fetch_one(self.pool())
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(row.get("id"))
    }

    /// Chain the outgoing attempt to its replacement and flip it to
    /// `replaced`, in one transaction (spec.md §4.4 RBF).
    pub async fn mark_replaced(&self, old_attempt_id: i64, new_attempt_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE post_attempts SET status = 'replaced', replaced_by = ?1 WHERE id = ?2")
            .bind(new_attempt_id)
            .bind(old_attempt_id)
            .execute(self.pool())
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    pub async fn mark_attempt_mined(
        &self,
        attempt_id: i64,
        block_number: u64,
        block_hash: H256,
        confirmed_at: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE post_attempts
             SET status = 'mined', block_number = ?1, block_hash = ?2, confirmed_at = ?3
             WHERE id = ?4",
        )
        .bind(block_number as i64)
        .bind(h256_to_hex(block_hash))
        .bind(confirmed_at)
        .bind(attempt_id)
        .execute(self.pool())
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    /// An attempt's inclusion was reverted by a reorg; distinct from
    /// `replaced` (superseded by a newer attempt) and `failed` (the L1
    /// submission itself was rejected).
    pub async fn mark_attempt_reorged(&self, attempt_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE post_attempts SET status = 'reorged' WHERE id = ?1")
            .bind(attempt_id)
            .execute(self.pool())
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    pub async fn mark_attempt_failed(&self, attempt_id: i64, reason: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE post_attempts SET status = 'failed', failure_reason = ?1 WHERE id = ?2")
            .bind(reason)
            .bind(attempt_id)
            .execute(self.pool())
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    /// The single live (non-`replaced`, non-`reorged`) attempt for a batch,
    /// if one exists. A batch with zero attempts hasn't been posted yet; a
    /// batch whose only attempts are all `failed` has exhausted posting.
    pub async fn live_attempt_for_batch(&self, batch_id: i64) -> Result<Option<PostAttempt>, StoreError> {
        let row = sqlx::query(
            "SELECT id, batch_id, l1_tx_hash, aggregator_request_id, l1_nonce, max_fee_per_gas,
                    max_priority_fee_per_gas, submitted_at, confirmed_at, block_number, block_hash,
                    status, replaced_by, failure_reason
             FROM post_attempts
             WHERE batch_id = ?1 AND status = 'pending'
             ORDER BY id DESC LIMIT 1",
        )
        .bind(batch_id)
        .fetch_optional(self.pool())
        .await
        .map_err(StoreError::from_sqlx)?;

        row.as_ref().map(row_to_attempt).transpose()
    }

    /// The `mined` attempt for a batch, if any — distinct from
    /// `live_attempt_for_batch` (which only sees `pending` attempts) and
    /// used by the Monitor to check a confirmed batch's block hash against
    /// the canonical chain (spec.md §4.5).
    pub async fn mined_attempt_for_batch(&self, batch_id: i64) -> Result<Option<PostAttempt>, StoreError> {
        let row = sqlx::query(
            "SELECT id, batch_id, l1_tx_hash, aggregator_request_id, l1_nonce, max_fee_per_gas,
                    max_priority_fee_per_gas, submitted_at, confirmed_at, block_number, block_hash,
                    status, replaced_by, failure_reason
             FROM post_attempts
             WHERE batch_id = ?1 AND status = 'mined'
             ORDER BY id DESC LIMIT 1",
        )
        .bind(batch_id)
        .fetch_optional(self.pool())
        .await
        .map_err(StoreError::from_sqlx)?;

        row.as_ref().map(row_to_attempt).transpose()
    }

    /// Attempts still `pending` after `older_than` (unix seconds), the set
    /// the Poster tick evaluates for RBF escalation (spec.md §4.4).
    pub async fn pending_attempts_older_than(&self, older_than: i64) -> Result<Vec<PostAttempt>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, batch_id, l1_tx_hash, aggregator_request_id, l1_nonce, max_fee_per_gas,
                    max_priority_fee_per_gas, submitted_at, confirmed_at, block_number, block_hash,
                    status, replaced_by, failure_reason
             FROM post_attempts
             WHERE status = 'pending' AND submitted_at <= ?1
             ORDER BY id ASC",
        )
        .bind(older_than)
        .fetch_all(self.pool())
        .await
        .map_err(StoreError::from_sqlx)?;

        rows.iter().map(row_to_attempt).collect()
    }

    pub async fn all_attempts_for_batch(&self, batch_id: i64) -> Result<Vec<PostAttempt>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, batch_id, l1_tx_hash, aggregator_request_id, l1_nonce, max_fee_per_gas,
                    max_priority_fee_per_gas, submitted_at, confirmed_at, block_number, block_hash,
                    status, replaced_by, failure_reason
             FROM post_attempts WHERE batch_id = ?1 ORDER BY id ASC",
        )
        .bind(batch_id)
        .fetch_all(self.pool())
        .await
        .map_err(StoreError::from_sqlx)?;

        rows.iter().map(row_to_attempt).collect()
    }

    /// `true` if every attempt made for this batch has hard-failed — the
    /// trigger for `mark_batch_failed` (spec.md §4.4).
    pub async fn all_attempts_failed(&self, batch_id: i64) -> Result<bool, StoreError> {
        let attempts = self.all_attempts_for_batch(batch_id).await?;
        Ok(!attempts.is_empty() && attempts.iter().all(|a| a.status == AttemptStatus::Failed))
    }

    /// Highest L1 nonce belonging to a `mined` attempt — the low-water mark
    /// nonce reservation rebuilds from on restart (spec.md §4.4 step 3).
    pub async fn highest_confirmed_l1_nonce(&self) -> Result<Option<u64>, StoreError> {
        let nonce: Option<i64> = sqlx::query_scalar("SELECT MAX(l1_nonce) FROM post_attempts WHERE status = 'mined'")
            .fetch_one(self.pool())
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(nonce.map(|n| n as u64))
    }

    /// Count of attempts still `pending` across every batch — the
    /// "outstanding pending attempts" term in the nonce reservation formula.
    pub async fn count_pending_attempts(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM post_attempts WHERE status = 'pending'")
            .fetch_one(self.pool())
            .await
            .map_err(StoreError::from_sqlx)
    }

    /// Most recent `confirmed_at` across every `mined` attempt, the figure
    /// `GET /health` compares against the 5-minute staleness window
    /// (spec.md §6).
    pub async fn last_confirmed_at(&self) -> Result<Option<i64>, StoreError> {
        sqlx::query_scalar("SELECT MAX(confirmed_at) FROM post_attempts WHERE status = 'mined'")
            .fetch_one(self.pool())
            .await
            .map_err(StoreError::from_sqlx)
    }

    /// The most recently recorded attempt for a batch regardless of status,
    /// preferring a `mined` row over a merely `pending` one — used by
    /// `sequencer_getTxStatus` to report the attempt currently relevant to a
    /// transaction's parent batch.
    pub async fn latest_relevant_attempt(&self, batch_id: i64) -> Result<Option<PostAttempt>, StoreError> {
        if let Some(mined) = self.mined_attempt_for_batch(batch_id).await? {
            return Ok(Some(mined));
        }
        self.live_attempt_for_batch(batch_id).await
    }

    /// Backfill the L1 transaction hash the aggregator surfaces some time
    /// after accepting a batch, once it actually lands the commitment
    /// (spec.md §4.4 Aggregator posting).
    pub async fn set_attempt_l1_tx_hash(&self, attempt_id: i64, hash: H256) -> Result<(), StoreError> {
        sqlx::query("UPDATE post_attempts SET l1_tx_hash = ?1 WHERE id = ?2")
            .bind(h256_to_hex(hash))
            .bind(attempt_id)
            .execute(self.pool())
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }
}

fn row_to_attempt(row: &sqlx::sqlite::SqliteRow) -> Result<PostAttempt, StoreError> {
    let l1_tx_hash_hex: Option<String> = row.get("l1_tx_hash");
    let block_hash_hex: Option<String> = row.get("block_hash");
    let status_text: String = row.get("status");
    let max_fee_hex: String = row.get("max_fee_per_gas");
    let max_priority_hex: String = row.get("max_priority_fee_per_gas");

    Ok(PostAttempt {
        id: row.get("id"),
        batch_id: row.get("batch_id"),
        l1_tx_hash: l1_tx_hash_hex
            .map(|h| h256_from_hex(&h))
            .transpose()
            .map_err(|e| StoreError::Conflict(e.to_string()))?,
        aggregator_request_id: row.get("aggregator_request_id"),
        l1_nonce: row.get::<i64, _>("l1_nonce") as u64,
        max_fee_per_gas: u256_from_sortable_hex(&max_fee_hex).map_err(|e| StoreError::Conflict(e.to_string()))?,
        max_priority_fee_per_gas: u256_from_sortable_hex(&max_priority_hex)
            .map_err(|e| StoreError::Conflict(e.to_string()))?,
        submitted_at: row.get("submitted_at"),
        confirmed_at: row.get("confirmed_at"),
        block_number: row.get::<Option<i64>, _>("block_number").map(|n| n as u64),
        block_hash: block_hash_hex
            .map(|h| h256_from_hex(&h))
            .transpose()
            .map_err(|e| StoreError::Conflict(e.to_string()))?,
        status: AttemptStatus::parse(&status_text).ok_or_else(|| StoreError::Conflict(format!("unknown attempt status {status_text}")))?,
        replaced_by: row.get("replaced_by"),
        failure_reason: row.get("failure_reason"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;
    use crate::types::{Batch, BatchState, PoolTransaction, TxKind, TxState};
    use ethers::types::Address;

    async fn sealed_batch(store: &Store) -> i64 {
        let hash = H256::repeat_byte(0x09);
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

        store
            .seal_batch(&Batch {
                id: 0,
                content_hash: H256::repeat_byte(0x10),
                wire_format: vec![0xaa],
                state: BatchState::Sealed,
                sealed_at: Some(1_700_000_000),
                blob_size: 10,
                gas_bid: U256::from(2_000_000_000u64),
                tx_count: 1,
                target_l1_block: 100,
                tx_hashes: vec![hash],
            })
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn records_and_fetches_live_attempt() {
        let store = test_store().await;
        let batch_id = sealed_batch(&store).await;

        let id = store
            .record_attempt(&NewAttempt {
                batch_id,
                l1_tx_hash: Some(H256::repeat_byte(0x77)),
                aggregator_request_id: None,
                l1_nonce: 5,
                max_fee_per_gas: U256::from(1_000u64),
                max_priority_fee_per_gas: U256::from(10u64),
                submitted_at: 1_700_000_000,
            })
            .await
            .unwrap();

        let live = store.live_attempt_for_batch(batch_id).await.unwrap().unwrap();
        assert_eq!(live.id, id);
        assert_eq!(live.status, AttemptStatus::Pending);
    }

    #[tokio::test]
    async fn rbf_chains_replaced_attempt_to_its_successor() {
        let store = test_store().await;
        let batch_id = sealed_batch(&store).await;

        let old_id = store
            .record_attempt(&NewAttempt {
                batch_id,
                l1_tx_hash: Some(H256::repeat_byte(0x01)),
                aggregator_request_id: None,
                l1_nonce: 5,
                max_fee_per_gas: U256::from(1_000u64),
                max_priority_fee_per_gas: U256::from(10u64),
                submitted_at: 1_700_000_000,
            })
            .await
            .unwrap();

        let new_id = store
            .record_attempt(&NewAttempt {
                batch_id,
                l1_tx_hash: Some(H256::repeat_byte(0x02)),
                aggregator_request_id: None,
                l1_nonce: 5,
                max_fee_per_gas: U256::from(1_125u64),
                max_priority_fee_per_gas: U256::from(11u64),
                submitted_at: 1_700_000_100,
            })
            .await
            .unwrap();

        store.mark_replaced(old_id, new_id).await.unwrap();

        let old = store.all_attempts_for_batch(batch_id).await.unwrap();
        let old_entry = old.iter().find(|a| a.id == old_id).unwrap();
        assert_eq!(old_entry.status, AttemptStatus::Replaced);
        assert_eq!(old_entry.replaced_by, Some(new_id));

        let live = store.live_attempt_for_batch(batch_id).await.unwrap().unwrap();
        assert_eq!(live.id, new_id);
    }

    #[tokio::test]
    async fn all_attempts_failed_detects_exhaustion() {
        let store = test_store().await;
        let batch_id = sealed_batch(&store).await;
        assert!(!store.all_attempts_failed(batch_id).await.unwrap());

        let id = store
            .record_attempt(&NewAttempt {
                batch_id,
                l1_tx_hash: None,
                aggregator_request_id: None,
                l1_nonce: 1,
                max_fee_per_gas: U256::from(1u64),
                max_priority_fee_per_gas: U256::from(1u64),
                submitted_at: 1_700_000_000,
            })
            .await
            .unwrap();
        store.mark_attempt_failed(id, "nonce too low").await.unwrap();

        assert!(store.all_attempts_failed(batch_id).await.unwrap());
    }
}
