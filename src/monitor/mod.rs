//! Inclusion Monitor Module
//!
//! Two independent long-lived loops, each on its own poll interval and
//! sharing one `CancellationToken` for shutdown: the L1 loop resolves
//! confirmations and detects reorgs on `submitted`/`l1_included` batches;
//! the L2 loop watches for member transactions landing in an L2 block
//! (spec.md §4.5). Neither loop holds state the other depends on — both
//! read and write exclusively through the Store.

use crate::config::Config;
use crate::l1::{L1Client, L2Client};
use crate::store::Store;
use crate::types::BatchState;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const L1_POLL_INTERVAL: Duration = Duration::from_secs(3);
const L2_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct InclusionMonitor {
    store: Store,
    l1: L1Client,
    l2: L2Client,
    finality_depth: u64,
}

impl InclusionMonitor {
    pub fn new(store: Store, l1: L1Client, l2: L2Client, config: &Config) -> Self {
        Self {
            store,
            l1,
            l2,
            finality_depth: config.l1.finality_depth,
        }
    }

    /// Runs until `cancel` fires. Intended to be spawned as its own task.
    pub async fn run_l1_loop(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("L1 monitor loop shutting down");
                    return;
                }
                _ = sleep(L1_POLL_INTERVAL) => {}
            }
            if let Err(err) = self.l1_tick().await {
                warn!(%err, "L1 monitor tick failed");
            }
        }
    }

    /// Runs until `cancel` fires. Intended to be spawned as its own task.
    pub async fn run_l2_loop(&self, cancel: CancellationToken) {
        let mut next_block: Option<u64> = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("L2 monitor loop shutting down");
                    return;
                }
                _ = sleep(L2_POLL_INTERVAL) => {}
            }
            if let Err(err) = self.l2_tick(&mut next_block).await {
                warn!(%err, "L2 monitor tick failed");
            }
        }
    }

    async fn l1_tick(&self) -> anyhow::Result<()> {
        self.resolve_submitted().await?;
        self.check_reorgs_and_finality().await?;
        Ok(())
    }

    /// For every `submitted` batch, resolve its live attempt's receipt
    /// (spec.md §4.5 "on each new L1 head... resolve its live attempt's
    /// `l1_tx_hash`"). Direct and Aggregator attempts both end up with an
    /// `l1_tx_hash` eventually, so this loop doesn't need to know which
    /// backend produced the attempt.
    async fn resolve_submitted(&self) -> anyhow::Result<()> {
        let submitted = self.store.batches_in_state(BatchState::Submitted).await?;
        for batch in submitted {
            let Some(attempt) = self.store.live_attempt_for_batch(batch.id).await? else {
                continue;
            };
            let Some(hash) = attempt.l1_tx_hash else { continue };
            if let Some(receipt) = self.l1.transaction_receipt(hash).await? {
                self.store
                    .mark_attempt_mined(attempt.id, receipt.block_number, receipt.block_hash, now())
                    .await?;
                self.store.mark_batch_l1_included(batch.id).await?;
                info!(batch_id = batch.id, block_number = receipt.block_number, "Monitor observed L1 confirmation");
            }
        }
        Ok(())
    }

    /// For every `l1_included` batch, check its mined attempt's block hash
    /// against the canonical chain at that height. A mismatch means the
    /// confirming block fell off the chain: requeue every non-`l2_included`
    /// member. Past `finality_depth`, skip the check entirely and move the
    /// batch to `finalized` (spec.md §4.5).
    async fn check_reorgs_and_finality(&self) -> anyhow::Result<()> {
        let head = self.l1.block_number().await?;
        let included = self.store.batches_in_state(BatchState::L1Included).await?;

        for batch in included {
            let Some(attempt) = self.store.mined_attempt_for_batch(batch.id).await? else {
                continue;
            };
            let (Some(block_number), Some(block_hash)) = (attempt.block_number, attempt.block_hash) else {
                continue;
            };

            if head.saturating_sub(block_number) >= self.finality_depth {
                self.store.mark_batch_finalized(batch.id).await?;
                info!(batch_id = batch.id, block_number, "batch reached finality");
                continue;
            }

            match self.l1.block_hash(block_number).await? {
                Some(canonical) if canonical == block_hash => {}
                _ => {
                    self.store.mark_attempt_reorged(attempt.id).await?;
                    self.store.mark_batch_reorged(batch.id).await?;
                    warn!(batch_id = batch.id, block_number, "L1 reorg evicted confirming block, requeueing members");
                }
            }
        }
        Ok(())
    }

    /// Scan every L2 block since the last one we've seen; any transaction
    /// the Store knows by hash transitions to `l2_included` regardless of
    /// its parent batch's state (spec.md §4.5: "canonical ordering is the
    /// L2's prerogative").
    async fn l2_tick(&self, next_block: &mut Option<u64>) -> anyhow::Result<()> {
        let head = self.l2.block_number().await?;
        let start = next_block.unwrap_or(head);
        if start > head {
            return Ok(());
        }

        for number in start..=head {
            if let Some((block_hash, tx_hashes)) = self.l2.block(number).await? {
                for hash in tx_hashes {
                    if self.store.get_transaction(hash).await?.is_some() {
                        self.store.mark_l2_included(hash, number, block_hash).await?;
                    }
                }
            }
        }
        *next_block = Some(head + 1);
        Ok(())
    }
}

fn now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}
