//! Core Data Model
//!
//! This module defines the entities shared by every stage of the pipeline:
//! the `transaction` and `batch` state machines and the append-only
//! `post_attempts` log (see §3 of the design). Nothing here talks to the
//! store directly — these are the in-memory shapes the store rows decode
//! into and the pipeline stages pass around.

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a pooled transaction.
///
/// Terminal states are `L2Included` and `Dropped`; every other state can
/// still transition. `Batched`/`Submitted`/`L1Included` all still point at
/// a batch via `batch_id`; `Requeued` means the member batch was reorged
/// and the transaction is waiting to be picked up by a fresh batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Queued,
    Batched,
    Submitted,
    L1Included,
    L2Included,
    Dropped,
    Requeued,
}

impl TxState {
    pub fn as_str(self) -> &'static str {
        match self {
            TxState::Queued => "queued",
            TxState::Batched => "batched",
            TxState::Submitted => "submitted",
            TxState::L1Included => "l1_included",
            TxState::L2Included => "l2_included",
            TxState::Dropped => "dropped",
            TxState::Requeued => "requeued",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "queued" => TxState::Queued,
            "batched" => TxState::Batched,
            "submitted" => TxState::Submitted,
            "l1_included" => TxState::L1Included,
            "l2_included" => TxState::L2Included,
            "dropped" => TxState::Dropped,
            "requeued" => TxState::Requeued,
            _ => return None,
        })
    }

    /// Whether a transaction in this state still occupies a pool slot
    /// for the purposes of admission back-pressure and selection.
    pub fn is_pending(self) -> bool {
        matches!(self, TxState::Queued | TxState::Requeued)
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The EIP-2718 typed-transaction family. Anything else is rejected at
/// ingress (spec.md §4.2 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Legacy,
    Eip2930,
    Eip1559,
}

/// A decoded, validated transaction, immutable once admitted.
///
/// `raw` is the exact byte sequence the caller submitted; every other
/// field is derived from it at ingress and never recomputed afterward.
#[derive(Debug, Clone)]
pub struct PoolTransaction {
    pub hash: H256,
    pub raw: Vec<u8>,
    pub from_address: Address,
    pub nonce: u64,
    pub kind: TxKind,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: Option<U256>,
    pub gas_limit: u64,
    pub intrinsic_gas: u64,
    pub received_seq: u64,
    pub received_at: i64,
    pub state: TxState,
    pub batch_id: Option<i64>,
    pub l2_block_number: Option<u64>,
    pub l2_block_hash: Option<H256>,
    pub drop_reason: Option<String>,
}

/// Lifecycle state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Open,
    Sealed,
    Submitted,
    L1Included,
    Reorged,
    Failed,
    Finalized,
}

impl BatchState {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchState::Open => "open",
            BatchState::Sealed => "sealed",
            BatchState::Submitted => "submitted",
            BatchState::L1Included => "l1_included",
            BatchState::Reorged => "reorged",
            BatchState::Failed => "failed",
            BatchState::Finalized => "finalized",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "open" => BatchState::Open,
            "sealed" => BatchState::Sealed,
            "submitted" => BatchState::Submitted,
            "l1_included" => BatchState::L1Included,
            "reorged" => BatchState::Reorged,
            "failed" => BatchState::Failed,
            "finalized" => BatchState::Finalized,
            _ => return None,
        })
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sealed (or sealing) batch of L2 transactions framed for L1 commitment.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: i64,
    pub content_hash: H256,
    pub wire_format: Vec<u8>,
    pub state: BatchState,
    pub sealed_at: Option<i64>,
    pub blob_size: u64,
    pub gas_bid: U256,
    pub tx_count: usize,
    pub target_l1_block: u64,
    pub tx_hashes: Vec<H256>,
}

/// Status of one L1 submission attempt for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Mined,
    Replaced,
    Reorged,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Mined => "mined",
            AttemptStatus::Replaced => "replaced",
            AttemptStatus::Reorged => "reorged",
            AttemptStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => AttemptStatus::Pending,
            "mined" => AttemptStatus::Mined,
            "replaced" => AttemptStatus::Replaced,
            "reorged" => AttemptStatus::Reorged,
            "failed" => AttemptStatus::Failed,
            _ => return None,
        })
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the append-only `post_attempts` log.
#[derive(Debug, Clone)]
pub struct PostAttempt {
    pub id: i64,
    pub batch_id: i64,
    pub l1_tx_hash: Option<H256>,
    pub aggregator_request_id: Option<String>,
    pub l1_nonce: u64,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub submitted_at: i64,
    pub confirmed_at: Option<i64>,
    pub block_number: Option<u64>,
    pub block_hash: Option<H256>,
    pub status: AttemptStatus,
    pub replaced_by: Option<i64>,
    pub failure_reason: Option<String>,
}

impl PostAttempt {
    pub fn submission_mode(&self) -> SubmissionMode {
        if self.aggregator_request_id.is_some() {
            SubmissionMode::Aggregator
        } else {
            SubmissionMode::Direct
        }
    }
}

/// Which Poster backend produced an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionMode {
    Direct,
    Aggregator,
}

impl fmt::Display for SubmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionMode::Direct => f.write_str("direct"),
            SubmissionMode::Aggregator => f.write_str("aggregator"),
        }
    }
}

/// `sequencer_getTxStatus` response payload.
#[derive(Debug, Clone, Serialize)]
pub struct TxStatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_mode: Option<SubmissionMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l1_tx_hash: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub da_request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l1_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l2_block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drop_reason: Option<String>,
}

impl TxStatusResponse {
    pub fn unknown() -> Self {
        Self {
            status: "unknown".to_string(),
            batch_id: None,
            batch_state: None,
            submission_mode: None,
            l1_tx_hash: None,
            da_request_id: None,
            l1_block: None,
            l2_block: None,
            drop_reason: None,
        }
    }
}

/// `sequencer_getStats` response payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub queued_txs: i64,
    pub included_txs: i64,
    pub dropped_txs: i64,
    pub confirmed_batches: i64,
    pub pending_batches: i64,
}

/// `GET /health` response payload.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub uptime: u64,
    pub queued_txs: i64,
    pub pending_batches: i64,
    pub last_l1_confirmation: Option<i64>,
}
