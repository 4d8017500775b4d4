//! Direct Poster Backend
//!
//! Signs and broadcasts the wire-format payload as the calldata of an
//! ordinary EIP-1559 L1 transaction to itself, the way a self-funded
//! sequencer posts without an external DA service (spec.md §4.4).

use super::{now, GRACE_WINDOW_SECONDS};
use crate::config::Config;
use crate::errors::PosterError;
use crate::l1::L1Client;
use crate::store::{NewAttempt, Store};
use crate::types::{Batch, BatchState, PostAttempt};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Bytes, Eip1559TransactionRequest, H256, U256};
use tracing::{debug, info, warn};

/// Fixed tip paid on every Direct submission; spec.md's closed env-var set
/// has no knob for it, so it stays a constant rather than inventing one.
const DEFAULT_PRIORITY_FEE_WEI: u64 = 1_000_000_000; // 1 gwei

/// Used only when the node has no base fee to report (e.g. a fresh devnet
/// block before EIP-1559 activation height).
const FALLBACK_BASE_FEE_WEI: u64 = 25_000_000_000; // 25 gwei

const BASE_TX_GAS: u64 = 21_000;
const CALLDATA_GAS_PER_BYTE: u64 = 16;
const GAS_MARGIN: u64 = 100_000;

#[derive(Clone)]
pub struct DirectPoster {
    store: Store,
    l1: L1Client,
    wallet: LocalWallet,
    chain_id: u64,
    base_fee_multiplier: u64,
    escalation_rate_milli: u64,
}

impl DirectPoster {
    pub fn new(store: Store, l1: L1Client, config: &Config) -> anyhow::Result<Self> {
        let wallet: LocalWallet = config
            .l1
            .private_key
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid PRIVATE_KEY: {e}"))?;
        let wallet = wallet.with_chain_id(config.l1.chain_id);

        Ok(Self {
            store,
            l1,
            wallet,
            chain_id: config.l1.chain_id,
            base_fee_multiplier: config.l1.base_fee_multiplier,
            escalation_rate_milli: config.l1.escalation_rate_milli,
        })
    }

    /// Post a sealed batch: bail if it already has a live attempt, reserve
    /// a nonce, sign, broadcast, and record the attempt (spec.md §4.4
    /// Direct posting, steps 1-5).
    pub async fn post_batch(&self, batch_id: i64) -> Result<(), PosterError> {
        let batch = self.store.get_batch(batch_id).await?.ok_or(PosterError::NotPostable)?;
        if !matches!(batch.state, BatchState::Sealed | BatchState::Submitted) {
            return Err(PosterError::NotPostable);
        }
        if self.store.live_attempt_for_batch(batch_id).await?.is_some() {
            return Ok(());
        }

        let nonce = self.reserve_nonce().await?;
        let (max_fee, priority_fee) = self.compute_fees().await?;
        let (tx_hash, raw) = self.build_and_sign(nonce, max_fee, priority_fee, &batch.wire_format).await?;

        if let Err(err) = self.l1.send_raw_transaction(raw).await {
            if !is_benign_resubmission_error(&err) {
                return Err(PosterError::Rpc(err.to_string()));
            }
            debug!(batch_id, %err, "broadcast reported a benign resubmission error");
        }

        let attempt_id = self
            .store
            .record_attempt(&NewAttempt {
                batch_id,
                l1_tx_hash: Some(tx_hash),
                aggregator_request_id: None,
                l1_nonce: nonce,
                max_fee_per_gas: max_fee,
                max_priority_fee_per_gas: priority_fee,
                submitted_at: now(),
            })
            .await?;

        if batch.state == BatchState::Sealed {
            self.store.mark_batch_submitted(batch_id).await?;
        }

        info!(batch_id, attempt_id, %tx_hash, nonce, "posted batch to L1");
        Ok(())
    }

    /// Confirm mined attempts, then escalate anything still pending past
    /// its grace window.
    pub async fn tick(&self) -> Result<(), PosterError> {
        self.check_confirmations().await?;
        self.escalate_stale().await?;
        Ok(())
    }

    /// Highest confirmed L1 nonce plus one, plus every still-outstanding
    /// pending attempt — rebuildable from the store alone after a restart
    /// (spec.md §4.4 step 3). Falls back to the L1 node's own pending
    /// nonce count when nothing has ever been confirmed yet.
    async fn reserve_nonce(&self) -> Result<u64, PosterError> {
        let confirmed = self.store.highest_confirmed_l1_nonce().await?;
        let pending_count = self.store.count_pending_attempts().await? as u64;
        let base = match confirmed {
            Some(n) => n + 1,
            None => self
                .l1
                .transaction_count(self.wallet.address())
                .await
                .map_err(|e| PosterError::Rpc(e.to_string()))?,
        };
        Ok(base + pending_count)
    }

    async fn compute_fees(&self) -> Result<(U256, U256), PosterError> {
        let priority_fee = U256::from(DEFAULT_PRIORITY_FEE_WEI);
        let base_fee = self.l1.base_fee().await.map_err(|e| PosterError::Rpc(e.to_string()))?;
        let max_fee = match base_fee {
            Some(base) if !base.is_zero() => base * U256::from(self.base_fee_multiplier),
            _ => U256::from(FALLBACK_BASE_FEE_WEI) * U256::from(self.base_fee_multiplier),
        };
        Ok((max_fee, priority_fee))
    }

    async fn build_and_sign(
        &self,
        nonce: u64,
        max_fee: U256,
        max_priority_fee: U256,
        wire_format: &[u8],
    ) -> Result<(H256, Vec<u8>), PosterError> {
        let gas_limit = BASE_TX_GAS + wire_format.len() as u64 * CALLDATA_GAS_PER_BYTE + GAS_MARGIN;

        let request = Eip1559TransactionRequest::new()
            .to(self.wallet.address())
            .value(U256::zero())
            .data(Bytes::from(wire_format.to_vec()))
            .nonce(nonce)
            .max_fee_per_gas(max_fee)
            .max_priority_fee_per_gas(max_priority_fee)
            .gas(gas_limit)
            .chain_id(self.chain_id);

        let typed: TypedTransaction = request.into();
        let signature = self
            .wallet
            .sign_transaction(&typed)
            .await
            .map_err(|e| PosterError::Signing(e.to_string()))?;
        let raw = typed.rlp_signed(&signature).to_vec();
        let hash = typed.hash(&signature);
        Ok((hash, raw))
    }

    async fn check_confirmations(&self) -> Result<(), PosterError> {
        let submitted = self.store.batches_in_state(BatchState::Submitted).await?;
        for batch in submitted {
            let Some(attempt) = self.store.live_attempt_for_batch(batch.id).await? else {
                continue;
            };
            let Some(hash) = attempt.l1_tx_hash else { continue };
            match self.l1.transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    self.store
                        .mark_attempt_mined(attempt.id, receipt.block_number, receipt.block_hash, now())
                        .await?;
                    self.store.mark_batch_l1_included(batch.id).await?;
                    info!(batch_id = batch.id, attempt_id = attempt.id, block_number = receipt.block_number, "batch confirmed on L1");
                }
                Ok(None) => {}
                Err(err) => warn!(batch_id = batch.id, %err, "receipt lookup failed"),
            }
        }
        Ok(())
    }

    async fn escalate_stale(&self) -> Result<(), PosterError> {
        let cutoff = now() - GRACE_WINDOW_SECONDS;
        let stale = self.store.pending_attempts_older_than(cutoff).await?;
        for attempt in stale {
            if let Err(err) = self.escalate_one(&attempt).await {
                warn!(attempt_id = attempt.id, batch_id = attempt.batch_id, %err, "RBF escalation failed");
            }
        }
        Ok(())
    }

    async fn escalate_one(&self, attempt: &PostAttempt) -> Result<(), PosterError> {
        let batch = self.store.get_batch(attempt.batch_id).await?.ok_or(PosterError::NotPostable)?;
        match self.try_escalate(attempt, &batch).await {
            Ok(()) => Ok(()),
            Err(err @ PosterError::Rpc(_)) => {
                // Transient RPC failure: the existing pending attempt is untouched,
                // so the next tick retries it (spec.md §7 RpcFailure semantics).
                Err(err)
            }
            Err(err) => {
                self.store.mark_attempt_failed(attempt.id, &err.to_string()).await?;
                if self.store.all_attempts_failed(attempt.batch_id).await? {
                    self.store.mark_batch_failed(attempt.batch_id).await?;
                    warn!(batch_id = attempt.batch_id, "all posting attempts exhausted, batch marked failed");
                }
                Err(err)
            }
        }
    }

    async fn try_escalate(&self, attempt: &PostAttempt, batch: &Batch) -> Result<(), PosterError> {
        let new_max_fee = bump(attempt.max_fee_per_gas, self.escalation_rate_milli);
        let new_priority_fee = bump(attempt.max_priority_fee_per_gas, self.escalation_rate_milli);

        let (tx_hash, raw) = self
            .build_and_sign(attempt.l1_nonce, new_max_fee, new_priority_fee, &batch.wire_format)
            .await?;
        if let Err(err) = self.l1.send_raw_transaction(raw).await {
            if !is_benign_resubmission_error(&err) {
                return Err(PosterError::Rpc(err.to_string()));
            }
        }

        let new_attempt_id = self
            .store
            .record_attempt(&NewAttempt {
                batch_id: attempt.batch_id,
                l1_tx_hash: Some(tx_hash),
                aggregator_request_id: None,
                l1_nonce: attempt.l1_nonce,
                max_fee_per_gas: new_max_fee,
                max_priority_fee_per_gas: new_priority_fee,
                submitted_at: now(),
            })
            .await?;
        self.store.mark_replaced(attempt.id, new_attempt_id).await?;
        info!(
            batch_id = attempt.batch_id,
            old_attempt = attempt.id,
            new_attempt = new_attempt_id,
            "RBF escalation submitted"
        );
        Ok(())
    }
}

fn bump(fee: U256, rate_milli: u64) -> U256 {
    fee * U256::from(rate_milli) / U256::from(1000u64)
}

/// `nonce too low` / `already known` / `already imported` responses mean
/// our own resubmission raced the node's mempool, not a real failure
/// (spec.md §4.4 failure semantics).
fn is_benign_resubmission_error(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("nonce too low")
        || msg.contains("already known")
        || msg.contains("already imported")
        || msg.contains("known transaction")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_applies_escalation_rate() {
        let bumped = bump(U256::from(1_000_000_000u64), 1125);
        assert_eq!(bumped, U256::from(1_125_000_000u64));
    }

    #[test]
    fn benign_resubmission_errors_are_recognized() {
        assert!(is_benign_resubmission_error(&anyhow::anyhow!("nonce too low")));
        assert!(is_benign_resubmission_error(&anyhow::anyhow!("Already Known")));
        assert!(!is_benign_resubmission_error(&anyhow::anyhow!("insufficient funds")));
    }
}
