//! Poster Module
//!
//! Gets sealed batches onto L1. Two backends share one contract
//! (`post_batch`, `tick`): `DirectPoster` signs and broadcasts an ordinary
//! L1 transaction itself; `AggregatorPoster` hands the wire payload to an
//! external DA service and tracks the resulting request id until an
//! `l1_tx_hash` surfaces (spec.md §4.4).

mod aggregator;
mod direct;

pub use aggregator::AggregatorPoster;
pub use direct::DirectPoster;

use crate::config::Config;
use crate::errors::PosterError;
use crate::l1::L1Client;
use crate::store::Store;

/// Grace window before a still-`pending` attempt is eligible for RBF
/// escalation (spec.md §4.4 default).
const GRACE_WINDOW_SECONDS: i64 = 45;

/// One logical posting backend, chosen at startup by `USE_DA_BUILDER` and
/// held for the process lifetime. An enum rather than `dyn Trait`: both
/// backends' methods are `async fn`s, which aren't object-safe without
/// boxing every call, and there are exactly two variants to dispatch on.
#[derive(Clone)]
pub enum Poster {
    Direct(DirectPoster),
    Aggregator(AggregatorPoster),
}

impl Poster {
    pub fn new(store: Store, l1: L1Client, config: &Config) -> anyhow::Result<Self> {
        if config.poster.use_da_builder {
            Ok(Poster::Aggregator(AggregatorPoster::new(store, l1, config)?))
        } else {
            Ok(Poster::Direct(DirectPoster::new(store, l1, config)?))
        }
    }

    /// Submit a sealed batch that has no live attempt yet. A no-op if one
    /// already exists (idempotent w.r.t. the tick loop calling it twice).
    pub async fn post_batch(&self, batch_id: i64) -> Result<(), PosterError> {
        match self {
            Poster::Direct(p) => p.post_batch(batch_id).await,
            Poster::Aggregator(p) => p.post_batch(batch_id).await,
        }
    }

    /// Poll every outstanding attempt: confirm, or escalate past its grace
    /// window (spec.md §4.4 RBF + confirmation handling).
    pub async fn tick(&self) -> Result<(), PosterError> {
        match self {
            Poster::Direct(p) => p.tick().await,
            Poster::Aggregator(p) => p.tick().await,
        }
    }
}

fn now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}
