//! Batch Maker Tick
//!
//! Generalizes the teacher's `BatchOrchestrator` (periodic tick loop,
//! trigger-then-produce-then-log shape) to the trigger policy and
//! selection algorithm of spec.md §4.3, and `BatchEngine::create_batch` to
//! RLP framing via `crate::wire` plus the atomic seal transaction.

use super::selection::{select_batch, SelectionLimits};
use crate::config::Config;
use crate::l1::L1Client;
use crate::store::Store;
use crate::types::{Batch, BatchState};
use crate::wire::{encode_wire_format, BatchData};
use ethers::types::U256;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const FALLBACK_GAS_BID_WEI: u64 = 100_000_000_000; // 100 gwei
const TIME_TRIGGER_SECONDS: i64 = 3;
const FRAMING_RESERVATION_BYTES: u64 = 1_000;

pub struct BatchMaker {
    store: Store,
    l1: L1Client,
    chain_id: u64,
    magic_prefix: [u8; 8],
    max_bytes: u64,
    max_batch_gas: u64,
    max_per_sender: usize,
    max_count: usize,
    batch_count_trigger: usize,
    last_batch_time: AtomicI64,
}

impl BatchMaker {
    pub fn new(store: Store, l1: L1Client, config: &Config) -> Self {
        Self {
            store,
            l1,
            chain_id: config.l2.chain_id,
            magic_prefix: config.wire.magic_prefix,
            max_bytes: config.batch.max_batch_size_bytes.saturating_sub(FRAMING_RESERVATION_BYTES),
            max_batch_gas: config.batch.max_batch_gas,
            max_per_sender: config.batch.max_per_sender,
            max_count: config.batch.max_tx_per_batch,
            batch_count_trigger: config.batch.batch_count_trigger,
            last_batch_time: AtomicI64::new(now()),
        }
    }

    /// `should_create_batch() -> bool` (spec.md §4.3). Evaluates the three
    /// trigger conditions; updates `last_batch_time` whenever it fires,
    /// regardless of whether `create_batch` subsequently produces anything,
    /// to avoid hot-loop retries on a transient empty pool.
    pub async fn should_create_batch(&self) -> anyhow::Result<bool> {
        let pending_bytes = self.pending_byte_estimate().await?;
        let pending_count = self.store.pending_count().await? as usize;

        let byte_trigger = pending_bytes >= self.max_bytes;
        let count_trigger = pending_count >= self.batch_count_trigger;
        let time_trigger =
            pending_count > 0 && now() - self.last_batch_time.load(Ordering::SeqCst) >= TIME_TRIGGER_SECONDS;

        let fired = byte_trigger || count_trigger || time_trigger;
        if fired {
            self.last_batch_time.store(now(), Ordering::SeqCst);
        }
        Ok(fired)
    }

    async fn pending_byte_estimate(&self) -> anyhow::Result<u64> {
        Ok(self.store.pending_byte_total().await? as u64)
    }

    /// `create_batch() -> Option<batch_id>` (spec.md §4.3). Pulls a
    /// candidate snapshot, selects under the four simultaneous budgets,
    /// frames per the wire format, and seals atomically. Returns `None`
    /// both when there is nothing to select and when the resulting
    /// `content_hash` already exists (dedup, logged as a warning).
    pub async fn create_batch(&self) -> anyhow::Result<Option<i64>> {
        let candidates = self.store.pending_snapshot(self.max_count as i64 * 2).await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        let limits = SelectionLimits {
            max_bytes: self.max_bytes,
            max_batch_gas: self.max_batch_gas,
            max_per_sender: self.max_per_sender,
            max_count: self.max_count,
        };
        let selected = select_batch(&candidates, &limits);
        if selected.is_empty() {
            return Ok(None);
        }

        let current_block = self.l1.block_number().await?;
        let target_l1_block = current_block + 1;

        let raw_txs: Vec<Vec<u8>> = selected.iter().map(|t| t.raw.clone()).collect();
        let batch_data = BatchData::forced(self.chain_id, target_l1_block, raw_txs);
        let content_hash = batch_data.content_hash();
        let wire_format = encode_wire_format(self.magic_prefix, &batch_data);

        let blob_size = selected.iter().map(|t| t.raw.len() as u64).sum();
        let gas_bid = self.estimate_gas_bid().await;

        let batch = Batch {
            id: 0,
            content_hash,
            wire_format,
            state: BatchState::Sealed,
            sealed_at: Some(now()),
            blob_size,
            gas_bid,
            tx_count: selected.len(),
            target_l1_block,
            tx_hashes: selected.iter().map(|t| t.hash).collect(),
        };

        match self.store.seal_batch(&batch).await? {
            Some(id) => {
                info!(batch_id = id, tx_count = batch.tx_count, %content_hash, "sealed batch");
                Ok(Some(id))
            }
            None => {
                warn!(%content_hash, "batch with this content_hash already exists, skipping");
                Ok(None)
            }
        }
    }

    /// `gas_bid := 2 × estimateFeesPerGas().maxFeePerGas`, falling back to
    /// 100 gwei when the RPC call fails or omits a value (spec.md §4.3).
    async fn estimate_gas_bid(&self) -> U256 {
        match self.l1.estimate_eip1559_fees().await {
            Ok((max_fee, _)) if !max_fee.is_zero() => max_fee * U256::from(2u64),
            Ok(_) => U256::from(FALLBACK_GAS_BID_WEI),
            Err(err) => {
                debug!(?err, "fee estimation failed, falling back to 100 gwei gas bid");
                U256::from(FALLBACK_GAS_BID_WEI)
            }
        }
    }
}

fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}
