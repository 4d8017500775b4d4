//! Thin L2 RPC client
//!
//! The Inclusion Monitor's L2 loop only needs head height and the
//! transaction-hash list per block; everything else about the L2 node is
//! out of scope (spec.md §4.5).

use ethers::providers::{Http, Middleware, Provider};
use ethers::types::H256;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct L2Client {
    provider: Arc<Provider<Http>>,
}

impl L2Client {
    pub fn new(rpc_url: &str) -> anyhow::Result<Self> {
        let mut provider = Provider::<Http>::try_from(rpc_url)?;
        provider.set_interval(Duration::from_millis(500));
        Ok(Self { provider: Arc::new(provider) })
    }

    pub async fn block_number(&self) -> anyhow::Result<u64> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    /// `(block_hash, transaction_hashes)` for a given height, or `None` if
    /// the L2 node hasn't produced that block yet.
    pub async fn block(&self, number: u64) -> anyhow::Result<Option<(H256, Vec<H256>)>> {
        let block = self.provider.get_block(number).await?;
        Ok(block.and_then(|b| b.hash.map(|hash| (hash, b.transactions))))
    }
}
