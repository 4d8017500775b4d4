//! Transaction pool queries.
//!
//! The pool is not an in-memory structure; every pending transaction lives
//! as a row in `transactions` and is selected straight out of SQLite in
//! fee-then-arrival order (spec.md §4.1).

use super::convert::{h256_from_hex, h256_to_hex, u256_from_sortable_hex, u256_to_sortable_hex};
use super::Store;
use crate::errors::StoreError;
use crate::types::{PoolTransaction, TxKind, TxState};
use ethers::types::{Address, H256, U256};
use sqlx::Row;
use std::str::FromStr;

/// Outcome of inserting a newly-validated transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A fresh hash, admitted as `queued`.
    Inserted,
    /// The exact same hash was already known; ingress treats this as a
    /// success with no state change (spec.md §4.2 idempotency).
    DuplicateHash,
    /// An existing pending transaction from the same `(from, nonce)` was
    /// replaced; its row is dropped with `drop_reason = "replaced"` and the
    /// new transaction takes the pool slot.
    Replaced { old_hash: H256 },
}

impl Store {
    /// Insert a validated transaction, enforcing the replace-by-fee and
    /// idempotent-duplicate rules from spec.md §4.2 steps 1/8 inside one
    /// serializable transaction.
    pub async fn insert_transaction(
        &self,
        tx: &PoolTransaction,
    ) -> Result<InsertOutcome, StoreError> {
        let mut txn = self.pool().begin().await.map_err(StoreError::from_sqlx)?;

        let hash_hex = h256_to_hex(tx.hash);
        let existing: Option<String> = sqlx::query_scalar("SELECT hash FROM transactions WHERE hash = ?1")
            .bind(&hash_hex)
            .fetch_optional(&mut *txn)
            .await
            .map_err(StoreError::from_sqlx)?;
        if existing.is_some() {
            txn.rollback().await.map_err(StoreError::from_sqlx)?;
            return Ok(InsertOutcome::DuplicateHash);
        }

        let from_hex = format!("{:#x}", tx.from_address);
        let pending_row = sqlx::query(
            "SELECT hash FROM transactions WHERE from_address = ?1 AND nonce = ?2 AND state IN ('queued', 'requeued')",
        )
        .bind(&from_hex)
        .bind(tx.nonce as i64)
        .fetch_optional(&mut *txn)
        .await
        .map_err(StoreError::from_sqlx)?;

        let replaced = if let Some(row) = pending_row {
            let old_hash_hex: String = row.get("hash");
            sqlx::query("UPDATE transactions SET state = 'dropped', drop_reason = 'replaced' WHERE hash = ?1")
                .bind(&old_hash_hex)
                .execute(&mut *txn)
                .await
                .map_err(StoreError::from_sqlx)?;
            Some(h256_from_hex(&old_hash_hex).map_err(|e| StoreError::Conflict(e.to_string()))?)
        } else {
            None
        };

        let next_seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(received_seq), 0) + 1 FROM transactions")
            .fetch_one(&mut *txn)
            .await
            .map_err(StoreError::from_sqlx)?;

        sqlx::query(
            "INSERT INTO transactions
                (hash, raw, from_address, nonce, kind, max_fee_per_gas, max_priority_fee_per_gas,
                 gas_limit, intrinsic_gas, received_seq, received_at, state, batch_id,
                 l2_block_number, l2_block_hash, drop_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'queued', NULL, NULL, NULL, NULL)",
        )
        .bind(&hash_hex)
        .bind(&tx.raw)
        .bind(&from_hex)
        .bind(tx.nonce as i64)
        .bind(kind_str(tx.kind))
        .bind(u256_to_sortable_hex(tx.max_fee_per_gas))
        .bind(tx.max_priority_fee_per_gas.map(u256_to_sortable_hex))
        .bind(tx.gas_limit as i64)
        .bind(tx.intrinsic_gas as i64)
        .bind(next_seq)
        .bind(tx.received_at)
        .execute(&mut *txn)
        .await
        .map_err(StoreError::from_sqlx)?;

        txn.commit().await.map_err(StoreError::from_sqlx)?;

        Ok(match replaced {
            Some(old_hash) => InsertOutcome::Replaced { old_hash },
            None => InsertOutcome::Inserted,
        })
    }

    /// The currently-pending transaction occupying a `(from, nonce)` slot,
    /// if any. Read-only peek used by ingress to compute the required RBF
    /// fee bump *before* the replacing insert happens (spec.md §4.2 step 8,
    /// §9 Open Question 2).
    pub async fn pending_at_sender_nonce(
        &self,
        from_address: Address,
        nonce: u64,
    ) -> Result<Option<PoolTransaction>, StoreError> {
        let from_hex = format!("{:#x}", from_address);
        let row = sqlx::query(
            "SELECT hash, raw, from_address, nonce, kind, max_fee_per_gas, max_priority_fee_per_gas,
                    gas_limit, intrinsic_gas, received_seq, received_at, state, batch_id,
                    l2_block_number, l2_block_hash, drop_reason
             FROM transactions
             WHERE from_address = ?1 AND nonce = ?2 AND state IN ('queued', 'requeued')",
        )
        .bind(&from_hex)
        .bind(nonce as i64)
        .fetch_optional(self.pool())
        .await
        .map_err(StoreError::from_sqlx)?;

        row.as_ref().map(row_to_tx).transpose()
    }

    /// Count of rows in `{queued, requeued}`, the back-pressure figure
    /// compared against `MAX_PENDING_TXS` (spec.md §4.2 step 2).
    pub async fn pending_count(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE state IN ('queued', 'requeued')")
            .fetch_one(self.pool())
            .await
            .map_err(StoreError::from_sqlx)
    }

    /// Total encoded byte size of every pending transaction, the figure
    /// the Batch Maker's byte-size trigger compares against `maxBytes`
    /// (spec.md §4.3) — independent of any one selection round's cap.
    pub async fn pending_byte_total(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar(
            "SELECT COALESCE(SUM(LENGTH(raw)), 0) FROM transactions WHERE state IN ('queued', 'requeued')",
        )
        .fetch_one(self.pool())
        .await
        .map_err(StoreError::from_sqlx)
    }

    /// Candidate pool ordered by fee desc, arrival asc, the exact order the
    /// batch-maker selection walk consumes (spec.md §4.1 index, §4.3 step 2).
    pub async fn pending_snapshot(&self, limit: i64) -> Result<Vec<PoolTransaction>, StoreError> {
        let rows = sqlx::query(
            "SELECT hash, raw, from_address, nonce, kind, max_fee_per_gas, max_priority_fee_per_gas,
                    gas_limit, intrinsic_gas, received_seq, received_at, state, batch_id,
                    l2_block_number, l2_block_hash, drop_reason
             FROM transactions
             WHERE state IN ('queued', 'requeued')
             ORDER BY max_fee_per_gas DESC, received_seq ASC
             LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(StoreError::from_sqlx)?;

        rows.iter().map(row_to_tx).collect()
    }

    pub async fn get_transaction(&self, hash: H256) -> Result<Option<PoolTransaction>, StoreError> {
        let hash_hex = h256_to_hex(hash);
        let row = sqlx::query(
            "SELECT hash, raw, from_address, nonce, kind, max_fee_per_gas, max_priority_fee_per_gas,
                    gas_limit, intrinsic_gas, received_seq, received_at, state, batch_id,
                    l2_block_number, l2_block_hash, drop_reason
             FROM transactions WHERE hash = ?1",
        )
        .bind(&hash_hex)
        .fetch_optional(self.pool())
        .await
        .map_err(StoreError::from_sqlx)?;

        row.as_ref().map(row_to_tx).transpose()
    }

    /// Move every member of a batch to the target state in one statement,
    /// used when a batch transitions as a whole (submitted/l1_included).
    pub async fn update_member_states(&self, batch_id: i64, state: TxState) -> Result<(), StoreError> {
        sqlx::query("UPDATE transactions SET state = ?1 WHERE batch_id = ?2")
            .bind(state.as_str())
            .bind(batch_id)
            .execute(self.pool())
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    /// Requeue every member of a reorged batch: `batched`/`submitted`/
    /// `l1_included` rows go back to `requeued` with `batch_id` cleared so
    /// the next batch-maker tick can pick them up again (spec.md §4.5).
    pub async fn requeue_batch_members(&self, batch_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE transactions SET state = 'requeued', batch_id = NULL
             WHERE batch_id = ?1 AND state != 'l2_included'",
        )
        .bind(batch_id)
        .execute(self.pool())
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    /// Mark a transaction as observed in an L2 block. This happens
    /// independently of the parent batch's L1 fate (spec.md §4.6): a
    /// transaction can be `l2_included` while its batch is still
    /// `submitted`, and stays `l2_included` even if the batch later reorgs.
    pub async fn mark_l2_included(
        &self,
        hash: H256,
        l2_block_number: u64,
        l2_block_hash: H256,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE transactions SET state = 'l2_included', l2_block_number = ?1, l2_block_hash = ?2
             WHERE hash = ?3",
        )
        .bind(l2_block_number as i64)
        .bind(h256_to_hex(l2_block_hash))
        .bind(h256_to_hex(hash))
        .execute(self.pool())
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    pub async fn count_by_state(&self, state: TxState) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE state = ?1")
            .bind(state.as_str())
            .fetch_one(self.pool())
            .await
            .map_err(StoreError::from_sqlx)
    }

    pub async fn count_dropped(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE state = 'dropped'")
            .fetch_one(self.pool())
            .await
            .map_err(StoreError::from_sqlx)
    }
}

fn kind_str(kind: TxKind) -> &'static str {
    match kind {
        TxKind::Legacy => "legacy",
        TxKind::Eip2930 => "eip2930",
        TxKind::Eip1559 => "eip1559",
    }
}

fn kind_from_str(s: &str) -> Result<TxKind, StoreError> {
    Ok(match s {
        "legacy" => TxKind::Legacy,
        "eip2930" => TxKind::Eip2930,
        "eip1559" => TxKind::Eip1559,
        other => return Err(StoreError::Conflict(format!("unknown tx kind {other}"))),
    })
}

fn row_to_tx(row: &sqlx::sqlite::SqliteRow) -> Result<PoolTransaction, StoreError> {
    let hash_hex: String = row.get("hash");
    let from_hex: String = row.get("from_address");
    let kind_text: String = row.get("kind");
    let state_text: String = row.get("state");
    let max_fee_hex: String = row.get("max_fee_per_gas");
    let max_priority_hex: Option<String> = row.get("max_priority_fee_per_gas");
    let l2_block_hash_hex: Option<String> = row.get("l2_block_hash");

    Ok(PoolTransaction {
        hash: h256_from_hex(&hash_hex).map_err(|e| StoreError::Conflict(e.to_string()))?,
        raw: row.get::<Vec<u8>, _>("raw"),
        from_address: Address::from_str(&from_hex).map_err(|e| StoreError::Conflict(e.to_string()))?,
        nonce: row.get::<i64, _>("nonce") as u64,
        kind: kind_from_str(&kind_text)?,
        max_fee_per_gas: u256_from_sortable_hex(&max_fee_hex).map_err(|e| StoreError::Conflict(e.to_string()))?,
        max_priority_fee_per_gas: max_priority_hex
            .map(|h| u256_from_sortable_hex(&h))
            .transpose()
            .map_err(|e: hex::FromHexError| StoreError::Conflict(e.to_string()))?,
        gas_limit: row.get::<i64, _>("gas_limit") as u64,
        intrinsic_gas: row.get::<i64, _>("intrinsic_gas") as u64,
        received_seq: row.get::<i64, _>("received_seq") as u64,
        received_at: row.get("received_at"),
        state: TxState::parse(&state_text).ok_or_else(|| StoreError::Conflict(format!("unknown tx state {state_text}")))?,
        batch_id: row.get::<Option<i64>, _>("batch_id"),
        l2_block_number: row.get::<Option<i64>, _>("l2_block_number").map(|n| n as u64),
        l2_block_hash: l2_block_hash_hex
            .map(|h| h256_from_hex(&h))
            .transpose()
            .map_err(|e| StoreError::Conflict(e.to_string()))?,
        drop_reason: row.get("drop_reason"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    fn sample_tx(hash_byte: u8, from: Address, nonce: u64, fee: u64, seq_hint: i64) -> PoolTransaction {
        let _ = seq_hint;
        PoolTransaction {
            hash: H256::repeat_byte(hash_byte),
            raw: vec![0x01, 0x02],
            from_address: from,
            nonce,
            kind: TxKind::Eip1559,
            max_fee_per_gas: U256::from(fee),
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
        }
    }

    #[tokio::test]
    async fn inserts_and_fetches_a_fresh_transaction() {
        let store = test_store().await;
        let from = Address::repeat_byte(0x11);
        let tx = sample_tx(0xaa, from, 0, 100, 0);

        let outcome = store.insert_transaction(&tx).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);

        let fetched = store.get_transaction(tx.hash).await.unwrap().unwrap();
        assert_eq!(fetched.from_address, from);
        assert_eq!(fetched.state, TxState::Queued);
    }

    #[tokio::test]
    async fn duplicate_hash_is_idempotent() {
        let store = test_store().await;
        let tx = sample_tx(0xbb, Address::repeat_byte(0x22), 0, 100, 0);
        store.insert_transaction(&tx).await.unwrap();
        let second = store.insert_transaction(&tx).await.unwrap();
        assert_eq!(second, InsertOutcome::DuplicateHash);
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn same_sender_nonce_replaces_pending_transaction() {
        let store = test_store().await;
        let from = Address::repeat_byte(0x33);
        let old = sample_tx(0xcc, from, 5, 100, 0);
        store.insert_transaction(&old).await.unwrap();

        let replacement = sample_tx(0xdd, from, 5, 200, 0);
        let outcome = store.insert_transaction(&replacement).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Replaced { old_hash: old.hash });

        assert_eq!(store.pending_count().await.unwrap(), 1);
        let old_row = store.get_transaction(old.hash).await.unwrap().unwrap();
        assert_eq!(old_row.state, TxState::Dropped);
        assert_eq!(old_row.drop_reason.as_deref(), Some("replaced"));
    }

    #[tokio::test]
    async fn pending_snapshot_orders_by_fee_desc_then_arrival_asc() {
        let store = test_store().await;
        let from = Address::repeat_byte(0x44);
        let low_early = sample_tx(0x01, from, 0, 50, 0);
        let high_late = sample_tx(0x02, Address::repeat_byte(0x55), 1, 500, 0);
        let high_early = sample_tx(0x03, Address::repeat_byte(0x66), 2, 500, 0);

        store.insert_transaction(&low_early).await.unwrap();
        store.insert_transaction(&high_late).await.unwrap();
        store.insert_transaction(&high_early).await.unwrap();

        let snapshot = store.pending_snapshot(10).await.unwrap();
        let hashes: Vec<H256> = snapshot.iter().map(|t| t.hash).collect();
        assert_eq!(hashes, vec![high_late.hash, high_early.hash, low_early.hash]);
    }
}
