//! Aggregator Poster Backend
//!
//! Hands the wire-format payload to an external DA-builder service over
//! HTTPS instead of broadcasting an L1 transaction ourselves. The
//! aggregator returns a request id immediately; the L1 transaction hash
//! (and therefore confirmation) surfaces later, once the aggregator has
//! actually landed the commitment (spec.md §4.4 Aggregator posting).

use super::now;
use crate::config::Config;
use crate::errors::PosterError;
use crate::l1::L1Client;
use crate::store::{NewAttempt, Store};
use crate::types::BatchState;
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AggregatorPoster {
    store: Store,
    l1: L1Client,
    client: reqwest::Client,
    da_builder_url: String,
    proposer_address: Address,
}

#[derive(Serialize)]
struct SubmitRequest {
    proposer_address: Address,
    payload: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    request_id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    l1_tx_hash: Option<H256>,
}

impl AggregatorPoster {
    pub fn new(store: Store, l1: L1Client, config: &Config) -> anyhow::Result<Self> {
        let da_builder_url = config
            .poster
            .da_builder_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("DA_BUILDER_URL is required when USE_DA_BUILDER=true"))?;
        let proposer_address = config
            .poster
            .proposer_address
            .ok_or_else(|| anyhow::anyhow!("PROPOSER_ADDRESS is required when USE_DA_BUILDER=true"))?;

        Ok(Self {
            store,
            l1,
            client: reqwest::Client::new(),
            da_builder_url,
            proposer_address,
        })
    }

    /// Hand a sealed batch to the aggregator. Bails if a live attempt
    /// already exists for this batch (spec.md §4.4 steps 1-2, shared with
    /// Direct posting).
    pub async fn post_batch(&self, batch_id: i64) -> Result<(), PosterError> {
        let batch = self.store.get_batch(batch_id).await?.ok_or(PosterError::NotPostable)?;
        if !matches!(batch.state, BatchState::Sealed | BatchState::Submitted) {
            return Err(PosterError::NotPostable);
        }
        if self.store.live_attempt_for_batch(batch_id).await?.is_some() {
            return Ok(());
        }

        let request_id = self.submit(&batch.wire_format).await?;

        let attempt_id = self
            .store
            .record_attempt(&NewAttempt {
                batch_id,
                l1_tx_hash: None,
                aggregator_request_id: Some(request_id.clone()),
                l1_nonce: 0,
                max_fee_per_gas: U256::zero(),
                max_priority_fee_per_gas: U256::zero(),
                submitted_at: now(),
            })
            .await?;

        if batch.state == BatchState::Sealed {
            self.store.mark_batch_submitted(batch_id).await?;
        }

        info!(batch_id, attempt_id, request_id, "handed batch to DA aggregator");
        Ok(())
    }

    /// Poll every outstanding aggregator request for a discovered L1 hash,
    /// then poll L1 for its receipt. No RBF tick here: fee escalation for
    /// an aggregator-managed submission is the aggregator's concern, not
    /// ours.
    pub async fn tick(&self) -> Result<(), PosterError> {
        let submitted = self.store.batches_in_state(BatchState::Submitted).await?;
        for batch in submitted {
            let Some(attempt) = self.store.live_attempt_for_batch(batch.id).await? else {
                continue;
            };
            let Some(request_id) = attempt.aggregator_request_id.clone() else {
                continue;
            };

            let hash = match attempt.l1_tx_hash {
                Some(hash) => hash,
                None => match self.poll_status(&request_id).await {
                    Ok(Some(hash)) => {
                        self.store.set_attempt_l1_tx_hash(attempt.id, hash).await?;
                        hash
                    }
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(batch_id = batch.id, %err, "aggregator status poll failed");
                        continue;
                    }
                },
            };

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

    async fn submit(&self, wire_format: &[u8]) -> Result<String, PosterError> {
        let url = format!("{}/batches", self.da_builder_url.trim_end_matches('/'));
        let body = SubmitRequest {
            proposer_address: self.proposer_address,
            payload: format!("0x{}", hex::encode(wire_format)),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PosterError::Rpc(e.to_string()))?
            .error_for_status()
            .map_err(|e| PosterError::Rpc(e.to_string()))?
            .json::<SubmitResponse>()
            .await
            .map_err(|e| PosterError::Rpc(e.to_string()))?;

        Ok(response.request_id)
    }

    async fn poll_status(&self, request_id: &str) -> anyhow::Result<Option<H256>> {
        let url = format!("{}/batches/{}", self.da_builder_url.trim_end_matches('/'), request_id);
        let response = self.client.get(&url).send().await?.error_for_status()?.json::<StatusResponse>().await?;
        Ok(response.l1_tx_hash)
    }
}
