//! Ingress Module
//!
//! Accepts raw signed transaction bytes and admits them to the pool. The
//! pipeline runs the ordered checks from spec.md §4.2: syntactic shape,
//! back-pressure, decode/classify, fee floor, gas ceiling, intrinsic gas,
//! signature recovery, then the store's idempotent-insert/replace-by-fee
//! transaction.

pub mod decode;

use crate::config::Config;
use crate::errors::IngressError;
use crate::store::Store;
use crate::types::{PoolTransaction, TxKind, TxState};
use decode::{decode_and_recover, intrinsic_gas, DecodedTx};
use ethers::types::{H256, U256};
use ethers::utils::keccak256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// §4.2 step 1: raw payload byte budget (128 KiB).
const MAX_RAW_TX_BYTES: usize = 128 * 1024;

/// §4.2 step 5 `BLOCK_GAS_LIMIT` default. Not part of the closed env-var set
/// in spec.md §6, so this stays a built-in constant rather than a config
/// field.
const BLOCK_GAS_LIMIT: u64 = 100_000_000;

/// Result of a successful admission, handed back to the RPC layer so it can
/// report whether the submission was fresh or replaced an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Admitted,
    AlreadyKnown,
    Replaced { old_hash: H256 },
}

/// The admission pipeline. Holds the store it admits into and the tunables
/// from spec.md §4.2 (fee floor, gas ceiling, back-pressure limit).
pub struct Ingress {
    store: Store,
    max_pending_txs: usize,
    min_gas_price: U256,
    block_gas_limit: u64,
    escalation_rate_milli: u64,
}

impl Ingress {
    pub fn new(store: Store, config: &Config) -> Self {
        Self {
            store,
            max_pending_txs: config.ingress.max_pending_txs,
            min_gas_price: U256::from(config.l1.min_gas_price),
            block_gas_limit: BLOCK_GAS_LIMIT,
            escalation_rate_milli: config.l1.escalation_rate_milli,
        }
    }

    /// Run the full admission pipeline over `raw` transaction bytes
    /// (spec.md §4.2 steps 1-8).
    pub async fn admit(&self, raw: &[u8]) -> Result<(H256, AdmissionOutcome), IngressError> {
        // Step 1: syntactic shape (the hex-parity check happens one layer up,
        // where the wire string is decoded to these bytes; §4.2 step 1's byte
        // budget is enforced here).
        if raw.is_empty() {
            return Err(IngressError::MalformedInput("empty payload".to_string()));
        }
        if raw.len() > MAX_RAW_TX_BYTES {
            return Err(IngressError::MalformedInput("payload exceeds 128 KiB".to_string()));
        }

        // Step 2: back-pressure.
        let pending = self
            .store
            .pending_count()
            .await
            .map_err(|_| IngressError::Busy)?;
        if pending as usize >= self.max_pending_txs {
            warn!(pending, limit = self.max_pending_txs, "ingress back-pressure engaged");
            return Err(IngressError::Busy);
        }

        // Step 3: decode + classify + recover sender.
        let decoded = decode_and_recover(raw)?;
        let hash = H256::from_slice(&keccak256(raw));

        // Step 4: fee floor / priority-fee presence.
        self.check_fee(&decoded)?;

        // Step 5: gas limit ceiling.
        if decoded.gas_limit > self.block_gas_limit {
            return Err(IngressError::GasLimitTooHigh);
        }

        // Step 6: intrinsic gas.
        let intrinsic = intrinsic_gas(&decoded);
        if intrinsic > decoded.gas_limit {
            return Err(IngressError::IntrinsicGasExceedsLimit {
                intrinsic,
                limit: decoded.gas_limit,
            });
        }

        // Step 7: signature recovery already happened inside `decode_and_recover`;
        // `decoded.from_address` is only populated on a valid recovery.

        debug!(?hash, from = ?decoded.from_address, "transaction passed ingress checks");

        // Step 8a: if a pending transaction already occupies this sender's
        // nonce, the new one must bid at least `escalation_rate_milli`
        // over it to be accepted as a replacement (spec.md §9 Open
        // Question 2 — tightened from a bare `>` to `>= old * 1.125`).
        let incumbent = self
            .store
            .pending_at_sender_nonce(decoded.from_address, decoded.nonce)
            .await
            .map_err(|e| IngressError::MalformedInput(e.to_string()))?;
        if let Some(incumbent) = &incumbent {
            if incumbent.hash != hash {
                let required = incumbent.max_fee_per_gas * U256::from(self.escalation_rate_milli) / U256::from(1000u64);
                if decoded.max_fee_per_gas < required {
                    return Err(IngressError::Underpriced {
                        required: required.to_string(),
                        got: decoded.max_fee_per_gas.to_string(),
                    });
                }
            }
        }

        // Step 8b: store insertion (idempotent dup-hash / replace-by-fee / admit).
        let pool_tx = self.to_pool_transaction(raw, hash, &decoded);
        let outcome = self
            .store
            .insert_transaction(&pool_tx)
            .await
            .map_err(|e| IngressError::MalformedInput(e.to_string()))?;

        let outcome = match outcome {
            crate::store::InsertOutcome::Inserted => AdmissionOutcome::Admitted,
            crate::store::InsertOutcome::DuplicateHash => AdmissionOutcome::AlreadyKnown,
            crate::store::InsertOutcome::Replaced { old_hash } => AdmissionOutcome::Replaced { old_hash },
        };

        Ok((hash, outcome))
    }

    fn check_fee(&self, decoded: &DecodedTx) -> Result<(), IngressError> {
        if decoded.max_fee_per_gas < self.min_gas_price {
            return Err(IngressError::FeeTooLow);
        }
        if matches!(decoded.kind, TxKind::Eip1559) && decoded.max_priority_fee_per_gas.is_none() {
            return Err(IngressError::MissingPriorityFee);
        }
        Ok(())
    }

    fn to_pool_transaction(&self, raw: &[u8], hash: H256, decoded: &DecodedTx) -> PoolTransaction {
        PoolTransaction {
            hash,
            raw: raw.to_vec(),
            from_address: decoded.from_address,
            nonce: decoded.nonce,
            kind: decoded.kind,
            max_fee_per_gas: decoded.max_fee_per_gas,
            max_priority_fee_per_gas: decoded.max_priority_fee_per_gas,
            gas_limit: decoded.gas_limit,
            intrinsic_gas: intrinsic_gas(decoded),
            received_seq: 0,
            received_at: now(),
            state: TxState::Queued,
            batch_id: None,
            l2_block_number: None,
            l2_block_hash: None,
            drop_reason: None,
        }
    }
}

fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}
