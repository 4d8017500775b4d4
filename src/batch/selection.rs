//! Batch selection algorithm (spec.md §4.3).
//!
//! Pure function over an already fee/arrival-ordered snapshot: greedily
//! admits transactions while four budgets hold simultaneously, skipping
//! (not aborting on) any candidate that would breach one, so one oversized
//! transaction never blocks smaller ones behind it in the order.

use crate::types::PoolTransaction;
use ethers::types::Address;
use std::collections::HashMap;

pub struct SelectionLimits {
    pub max_bytes: u64,
    pub max_batch_gas: u64,
    pub max_per_sender: usize,
    pub max_count: usize,
}

/// `candidates` must already be ordered `max_fee_per_gas` desc, `received_seq`
/// asc — the same order `Store::pending_snapshot` returns.
pub fn select_batch(candidates: &[PoolTransaction], limits: &SelectionLimits) -> Vec<PoolTransaction> {
    let mut selected = Vec::new();
    let mut total_bytes: u64 = 0;
    let mut total_gas: u64 = 0;
    let mut per_sender: HashMap<Address, usize> = HashMap::new();

    for tx in candidates {
        if selected.len() >= limits.max_count {
            break;
        }
        let tx_bytes = tx.raw.len() as u64;
        let would_bytes = total_bytes + tx_bytes;
        let would_gas = total_gas + tx.intrinsic_gas;
        let sender_count = per_sender.get(&tx.from_address).copied().unwrap_or(0);

        if would_bytes > limits.max_bytes || would_gas > limits.max_batch_gas || sender_count >= limits.max_per_sender {
            continue;
        }

        total_bytes = would_bytes;
        total_gas = would_gas;
        per_sender.insert(tx.from_address, sender_count + 1);
        selected.push(tx.clone());
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TxKind, TxState};
    use ethers::types::{H256, U256};

    fn tx(hash: u8, from: Address, fee: u64, bytes: usize, gas: u64) -> PoolTransaction {
        PoolTransaction {
            hash: H256::repeat_byte(hash),
            raw: vec![0u8; bytes],
            from_address: from,
            nonce: 0,
            kind: TxKind::Eip1559,
            max_fee_per_gas: U256::from(fee),
            max_priority_fee_per_gas: Some(U256::from(1u64)),
            gas_limit: gas,
            intrinsic_gas: gas,
            received_seq: hash as u64,
            received_at: 0,
            state: TxState::Queued,
            batch_id: None,
            l2_block_number: None,
            l2_block_hash: None,
            drop_reason: None,
        }
    }

    #[test]
    fn skips_oversized_candidate_without_aborting() {
        let a = tx(1, Address::repeat_byte(1), 100, 900, 1_000);
        let too_big = tx(2, Address::repeat_byte(2), 90, 2_000, 1_000);
        let c = tx(3, Address::repeat_byte(3), 80, 100, 1_000);

        let limits = SelectionLimits {
            max_bytes: 1_000,
            max_batch_gas: 1_000_000,
            max_per_sender: 10,
            max_count: 500,
        };
        let selected = select_batch(&[a.clone(), too_big, c.clone()], &limits);
        assert_eq!(selected.iter().map(|t| t.hash).collect::<Vec<_>>(), vec![a.hash, c.hash]);
    }

    #[test]
    fn caps_per_sender_count() {
        let sender = Address::repeat_byte(9);
        let mut candidates = Vec::new();
        for i in 0..15u8 {
            candidates.push(tx(i, sender, 100, 10, 21_000));
        }
        let limits = SelectionLimits {
            max_bytes: 1_000_000,
            max_batch_gas: 1_000_000_000,
            max_per_sender: 10,
            max_count: 500,
        };
        let selected = select_batch(&candidates, &limits);
        assert_eq!(selected.len(), 10);
    }

    #[test]
    fn exact_byte_boundary_is_accepted() {
        let a = tx(1, Address::repeat_byte(1), 100, 800, 1_000);
        let b = tx(2, Address::repeat_byte(2), 90, 200, 1_000);
        let limits = SelectionLimits {
            max_bytes: 1_000,
            max_batch_gas: 1_000_000,
            max_per_sender: 10,
            max_count: 500,
        };
        let selected = select_batch(&[a.clone(), b.clone()], &limits);
        assert_eq!(selected.len(), 2);
    }
}
