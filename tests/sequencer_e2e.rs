//! Cross-component end-to-end scenarios.
//!
//! These exercise the Store together with Ingress and the pure batch
//! selection/wire-framing functions the way the Batch Maker, Poster, and
//! Inclusion Monitor actually call them (see `src/batch/maker.rs`,
//! `src/poster/direct.rs`, `src/monitor/mod.rs`) without requiring a live
//! L1/L2 node — every state transition below is the same Store method call
//! those components make internally.

use ethers::core::k256::ecdsa::SigningKey;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip1559::Eip1559TransactionRequest;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, NameOrAddress, H256, U256};
use sequencer::batch::{select_batch, SelectionLimits};
use sequencer::config::{
    ApiConfig, BatchConfig, Config, IngressConfig, L1Config, L2Config, MetricsConfig, PosterConfig,
    StoreConfig, WireConfig,
};
use sequencer::errors::IngressError;
use sequencer::ingress::{AdmissionOutcome, Ingress};
use sequencer::store::{NewAttempt, Store};
use sequencer::types::{Batch, BatchState, TxState};
use sequencer::wire::{encode_wire_format, BatchData};

const CHAIN_ID: u64 = 0xface;
const MAGIC_PREFIX: [u8; 8] = [0, 0, 0, 0, 0, 1, 0x23, 0x45];

async fn new_test_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let db_path = dir.path().join("sequencer.db");
    let store = Store::connect(db_path.to_str().unwrap()).await.expect("open store");
    (dir, store)
}

fn test_config(max_pending_txs: usize) -> Config {
    Config {
        l1: L1Config {
            rpc_url: "http://127.0.0.1:1".to_string(),
            chain_id: 1,
            private_key: String::new(),
            min_gas_price: 1_000_000_000,
            base_fee_multiplier: 2,
            escalation_rate_milli: 1125,
            finality_depth: 64,
        },
        l2: L2Config { rpc_url: "http://127.0.0.1:1".to_string(), chain_id: CHAIN_ID },
        batch: BatchConfig {
            max_tx_per_batch: 500,
            max_batch_size_bytes: 130_000,
            batch_interval_ms: 3_000,
            max_per_sender: 10,
            batch_count_trigger: 200,
            max_batch_gas: 30_000_000,
        },
        ingress: IngressConfig { max_pending_txs },
        poster: PosterConfig { use_da_builder: false, da_builder_url: None, proposer_address: None },
        store: StoreConfig { db_path: String::new() },
        api: ApiConfig { host: "127.0.0.1".to_string(), port: 0 },
        metrics: MetricsConfig { enabled: true, port: 0 },
        wire: WireConfig { magic_prefix: MAGIC_PREFIX },
        log_level: "info".to_string(),
    }
}

fn wallet(seed: u8) -> LocalWallet {
    let key = SigningKey::from_bytes(&[seed; 32].into()).unwrap();
    LocalWallet::from(key)
}

fn signed_eip1559(seed: u8, nonce: u64, max_fee_wei: u64, priority_fee_wei: u64) -> Vec<u8> {
    let wallet = wallet(seed);
    let tx: TypedTransaction = Eip1559TransactionRequest::new()
        .chain_id(1u64)
        .nonce(nonce)
        .max_fee_per_gas(U256::from(max_fee_wei))
        .max_priority_fee_per_gas(U256::from(priority_fee_wei))
        .gas(21_000u64)
        .to(NameOrAddress::Address(Address::repeat_byte(0x11)))
        .value(U256::zero())
        .into();
    let signature = wallet.sign_transaction_sync(&tx).unwrap();
    tx.rlp_signed(&signature).to_vec()
}

/// Select every pending transaction off the store and seal it into a batch,
/// the same selection + framing + seal sequence `BatchMaker::create_batch`
/// runs (minus the L1 fee-bid/target-block lookups, which need a live node).
async fn seal_all_pending(store: &Store, target_l1_block: u64) -> i64 {
    let candidates = store.pending_snapshot(1_000).await.unwrap();
    let limits = SelectionLimits { max_bytes: 130_000, max_batch_gas: 30_000_000, max_per_sender: 10, max_count: 500 };
    let selected = select_batch(&candidates, &limits);
    assert!(!selected.is_empty(), "expected at least one selectable transaction");

    let raw_txs: Vec<Vec<u8>> = selected.iter().map(|t| t.raw.clone()).collect();
    let batch_data = BatchData::forced(CHAIN_ID, target_l1_block, raw_txs);
    let content_hash = batch_data.content_hash();
    let wire_format = encode_wire_format(MAGIC_PREFIX, &batch_data);

    let batch = Batch {
        id: 0,
        content_hash,
        wire_format,
        state: BatchState::Sealed,
        sealed_at: Some(1_700_000_000),
        blob_size: selected.iter().map(|t| t.raw.len() as u64).sum(),
        gas_bid: U256::from(2_000_000_000u64),
        tx_count: selected.len(),
        target_l1_block,
        tx_hashes: selected.iter().map(|t| t.hash).collect(),
    };

    store.seal_batch(&batch).await.unwrap().expect("fresh content_hash seals")
}

#[tokio::test]
async fn happy_path_tx_reaches_l2_inclusion() {
    let (_dir, store) = new_test_store().await;
    let ingress = Ingress::new(store.clone(), &test_config(10_000));

    let raw = signed_eip1559(0x01, 0, 2_000_000_000, 1_000_000_000);
    let (hash, outcome) = ingress.admit(&raw).await.unwrap();
    assert_eq!(outcome, AdmissionOutcome::Admitted);

    let batch_id = seal_all_pending(&store, 100).await;
    assert_eq!(store.get_transaction(hash).await.unwrap().unwrap().state, TxState::Batched);

    // Poster's first submission (src/poster/direct.rs::post_batch).
    let attempt_id = store
        .record_attempt(&NewAttempt {
            batch_id,
            l1_tx_hash: Some(H256::repeat_byte(0xaa)),
            aggregator_request_id: None,
            l1_nonce: 0,
            max_fee_per_gas: U256::from(2_000_000_000u64),
            max_priority_fee_per_gas: U256::from(1_000_000_000u64),
            submitted_at: 1_700_000_000,
        })
        .await
        .unwrap();
    store.mark_batch_submitted(batch_id).await.unwrap();
    assert_eq!(store.get_transaction(hash).await.unwrap().unwrap().state, TxState::Submitted);

    // Monitor observes the L1 confirmation (src/monitor/mod.rs::resolve_submitted).
    store.mark_attempt_mined(attempt_id, 101, H256::repeat_byte(0xbb), 1_700_000_100).await.unwrap();
    store.mark_batch_l1_included(batch_id).await.unwrap();
    assert_eq!(store.get_transaction(hash).await.unwrap().unwrap().state, TxState::L1Included);

    // Monitor's L2 loop observes the transaction landing in an L2 block.
    store.mark_l2_included(hash, 42, H256::repeat_byte(0xcc)).await.unwrap();
    let final_tx = store.get_transaction(hash).await.unwrap().unwrap();
    assert_eq!(final_tx.state, TxState::L2Included);
    assert_eq!(final_tx.l2_block_number, Some(42));
}

#[tokio::test]
async fn replace_by_fee_at_ingress_requires_minimum_bump() {
    let (_dir, store) = new_test_store().await;
    let ingress = Ingress::new(store.clone(), &test_config(10_000));

    let original = signed_eip1559(0x02, 0, 2_000_000_000, 1_000_000_000);
    let (old_hash, outcome) = ingress.admit(&original).await.unwrap();
    assert_eq!(outcome, AdmissionOutcome::Admitted);

    // 1.10x is below the 1.125x floor: rejected.
    let underpriced = signed_eip1559(0x02, 0, 2_200_000_000, 1_000_000_000);
    let err = ingress.admit(&underpriced).await.unwrap_err();
    assert!(matches!(err, IngressError::Underpriced { .. }));
    assert_eq!(store.pending_count().await.unwrap(), 1);

    // 1.125x exactly clears the floor: replaces the incumbent.
    let replacement = signed_eip1559(0x02, 0, 2_250_000_000, 1_000_000_000);
    let (new_hash, outcome) = ingress.admit(&replacement).await.unwrap();
    assert_eq!(outcome, AdmissionOutcome::Replaced { old_hash });
    assert_ne!(old_hash, new_hash);

    assert_eq!(store.pending_count().await.unwrap(), 1);
    let old_tx = store.get_transaction(old_hash).await.unwrap().unwrap();
    assert_eq!(old_tx.state, TxState::Dropped);
    assert_eq!(old_tx.drop_reason.as_deref(), Some("replaced"));
}

#[tokio::test]
async fn rbf_on_l1_chains_escalated_attempt() {
    let (_dir, store) = new_test_store().await;
    let ingress = Ingress::new(store.clone(), &test_config(10_000));

    let raw = signed_eip1559(0x03, 0, 2_000_000_000, 1_000_000_000);
    ingress.admit(&raw).await.unwrap();
    let batch_id = seal_all_pending(&store, 100).await;

    let old_id = store
        .record_attempt(&NewAttempt {
            batch_id,
            l1_tx_hash: Some(H256::repeat_byte(0x01)),
            aggregator_request_id: None,
            l1_nonce: 7,
            max_fee_per_gas: U256::from(2_000_000_000u64),
            max_priority_fee_per_gas: U256::from(1_000_000_000u64),
            submitted_at: 1_700_000_000,
        })
        .await
        .unwrap();
    store.mark_batch_submitted(batch_id).await.unwrap();

    // Past the grace window without a receipt: escalate at the configured rate.
    let bumped_max_fee = U256::from(2_000_000_000u64) * U256::from(1125u64) / U256::from(1000u64);
    let bumped_priority_fee = U256::from(1_000_000_000u64) * U256::from(1125u64) / U256::from(1000u64);
    let new_id = store
        .record_attempt(&NewAttempt {
            batch_id,
            l1_tx_hash: Some(H256::repeat_byte(0x02)),
            aggregator_request_id: None,
            l1_nonce: 7,
            max_fee_per_gas: bumped_max_fee,
            max_priority_fee_per_gas: bumped_priority_fee,
            submitted_at: 1_700_000_100,
        })
        .await
        .unwrap();
    store.mark_replaced(old_id, new_id).await.unwrap();

    let attempts = store.all_attempts_for_batch(batch_id).await.unwrap();
    let old_entry = attempts.iter().find(|a| a.id == old_id).unwrap();
    assert_eq!(old_entry.status, sequencer::types::AttemptStatus::Replaced);
    assert_eq!(old_entry.replaced_by, Some(new_id));

    let live = store.live_attempt_for_batch(batch_id).await.unwrap().unwrap();
    assert_eq!(live.id, new_id);
    assert_eq!(live.max_fee_per_gas, bumped_max_fee);
}

#[tokio::test]
async fn l1_reorg_requeues_members_for_reinclusion() {
    let (_dir, store) = new_test_store().await;
    let ingress = Ingress::new(store.clone(), &test_config(10_000));

    let raw = signed_eip1559(0x04, 0, 2_000_000_000, 1_000_000_000);
    let (hash, _) = ingress.admit(&raw).await.unwrap();
    let batch_id = seal_all_pending(&store, 100).await;

    let attempt_id = store
        .record_attempt(&NewAttempt {
            batch_id,
            l1_tx_hash: Some(H256::repeat_byte(0x11)),
            aggregator_request_id: None,
            l1_nonce: 0,
            max_fee_per_gas: U256::from(2_000_000_000u64),
            max_priority_fee_per_gas: U256::from(1_000_000_000u64),
            submitted_at: 1_700_000_000,
        })
        .await
        .unwrap();
    store.mark_batch_submitted(batch_id).await.unwrap();
    store.mark_attempt_mined(attempt_id, 101, H256::repeat_byte(0x22), 1_700_000_100).await.unwrap();
    store.mark_batch_l1_included(batch_id).await.unwrap();

    // The confirming block falls off the canonical chain.
    store.mark_attempt_reorged(attempt_id).await.unwrap();
    store.mark_batch_reorged(batch_id).await.unwrap();

    let batch = store.get_batch(batch_id).await.unwrap().unwrap();
    assert_eq!(batch.state, BatchState::Reorged);
    let member = store.get_transaction(hash).await.unwrap().unwrap();
    assert_eq!(member.state, TxState::Requeued);
    assert_eq!(member.batch_id, None);

    // A fresh batch (different target block, different content_hash) re-includes it.
    let new_batch_id = seal_all_pending(&store, 200).await;
    assert_ne!(new_batch_id, batch_id);
    let member = store.get_transaction(hash).await.unwrap().unwrap();
    assert_eq!(member.state, TxState::Batched);
    assert_eq!(member.batch_id, Some(new_batch_id));
}

#[tokio::test]
async fn back_pressure_rejects_admission_once_pool_is_full() {
    let (_dir, store) = new_test_store().await;
    let ingress = Ingress::new(store.clone(), &test_config(2));

    ingress.admit(&signed_eip1559(0x05, 0, 2_000_000_000, 1_000_000_000)).await.unwrap();
    ingress.admit(&signed_eip1559(0x06, 0, 2_000_000_000, 1_000_000_000)).await.unwrap();

    let err = ingress
        .admit(&signed_eip1559(0x07, 0, 2_000_000_000, 1_000_000_000))
        .await
        .unwrap_err();
    assert_eq!(err, IngressError::Busy);
    assert_eq!(store.pending_count().await.unwrap(), 2);
}

#[tokio::test]
async fn dedup_declines_a_second_batch_with_the_same_content_hash() {
    let (_dir, store) = new_test_store().await;
    let ingress = Ingress::new(store.clone(), &test_config(10_000));

    let raw = signed_eip1559(0x08, 0, 2_000_000_000, 1_000_000_000);
    let (hash, _) = ingress.admit(&raw).await.unwrap();

    let batch_data = BatchData::forced(CHAIN_ID, 100, vec![raw.clone()]);
    let content_hash = batch_data.content_hash();
    let wire_format = encode_wire_format(MAGIC_PREFIX, &batch_data);

    let make_batch = || Batch {
        id: 0,
        content_hash,
        wire_format: wire_format.clone(),
        state: BatchState::Sealed,
        sealed_at: Some(1_700_000_000),
        blob_size: raw.len() as u64,
        gas_bid: U256::from(2_000_000_000u64),
        tx_count: 1,
        target_l1_block: 100,
        tx_hashes: vec![hash],
    };

    let first = store.seal_batch(&make_batch()).await.unwrap();
    assert!(first.is_some());

    // A crash-restart replay of the exact same batch is a no-op, not a second row.
    let second = store.seal_batch(&make_batch()).await.unwrap();
    assert!(second.is_none());
}
