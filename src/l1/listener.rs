//! L1 RPC Client
//!
//! A thin wrapper around `ethers::providers::Provider<Http>` exposing only
//! the operations the Batch Maker, Poster, and Inclusion Monitor need:
//! fee estimation, block/head queries, nonce tracking, and raw-transaction
//! broadcast. Nothing here interprets bridge events — this sequencer has no
//! forced-inclusion queue fed from L1 (see DESIGN.md).

use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct L1Client {
    provider: Arc<Provider<Http>>,
}

#[derive(Debug, Clone)]
pub struct ReceiptInfo {
    pub block_number: u64,
    pub block_hash: H256,
}

impl L1Client {
    pub fn new(rpc_url: &str) -> anyhow::Result<Self> {
        let mut provider = Provider::<Http>::try_from(rpc_url)?;
        provider.set_interval(Duration::from_millis(500));
        Ok(Self { provider: Arc::new(provider) })
    }

    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }

    pub async fn block_number(&self) -> anyhow::Result<u64> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    pub async fn block_hash(&self, number: u64) -> anyhow::Result<Option<H256>> {
        Ok(self.provider.get_block(number).await?.and_then(|b| b.hash))
    }

    /// `estimateFeesPerGas` — returns `(max_fee_per_gas, max_priority_fee_per_gas)`.
    pub async fn estimate_eip1559_fees(&self) -> anyhow::Result<(U256, U256)> {
        let (max_fee, max_priority_fee) = self.provider.estimate_eip1559_fees(None).await?;
        Ok((max_fee, max_priority_fee))
    }

    pub async fn base_fee(&self) -> anyhow::Result<Option<U256>> {
        let block = self.provider.get_block(ethers::types::BlockNumber::Latest).await?;
        Ok(block.and_then(|b| b.base_fee_per_gas))
    }

    /// Highest nonce the L1 node has observed for `address`, including
    /// pending transactions — the starting point for local nonce
    /// reservation on first boot (spec.md §4.4 step 3).
    pub async fn transaction_count(&self, address: Address) -> anyhow::Result<u64> {
        Ok(self
            .provider
            .get_transaction_count(address, Some(ethers::types::BlockNumber::Pending.into()))
            .await?
            .as_u64())
    }

    pub async fn send_raw_transaction(&self, raw: Vec<u8>) -> anyhow::Result<H256> {
        let pending = self.provider.send_raw_transaction(Bytes::from(raw)).await?;
        Ok(pending.tx_hash())
    }

    pub async fn transaction_receipt(&self, hash: H256) -> anyhow::Result<Option<ReceiptInfo>> {
        let receipt = self.provider.get_transaction_receipt(hash).await?;
        Ok(receipt.map(|r| ReceiptInfo {
            block_number: r.block_number.map(|n| n.as_u64()).unwrap_or_default(),
            block_hash: r.block_hash.unwrap_or_default(),
        }))
    }
}
