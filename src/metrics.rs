//! Prometheus Metrics Exposition
//!
//! `GET /metrics` in Prometheus text format (spec.md §6). The formatting
//! itself is out of scope per spec.md §1 ("Prometheus text formatting" is
//! named as an external collaborator's concern); what this module owns is
//! deciding *which* gauges exist and refreshing them from the Store
//! immediately before each scrape, the way a single-process exporter without
//! a push gateway has to.

use crate::errors::StoreError;
use crate::store::Store;
use crate::types::BatchState;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static QUEUED_TXS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("sequencer_queued_txs", "Transactions in queued/requeued state").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

static INCLUDED_TXS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("sequencer_included_txs", "Transactions observed in an L2 block").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

static DROPPED_TXS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("sequencer_dropped_txs", "Transactions dropped (replaced or rejected)").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

static CONFIRMED_BATCHES: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("sequencer_confirmed_batches", "Batches l1_included or finalized").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

static PENDING_BATCHES: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("sequencer_pending_batches", "Batches sealed or submitted, awaiting confirmation").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

static FAILED_BATCHES: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("sequencer_failed_batches", "Batches abandoned after every attempt failed").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

static LAST_L1_CONFIRMATION: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "sequencer_last_l1_confirmation_timestamp",
        "Unix timestamp of the most recent L1 confirmation observed, 0 if none yet",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Force every gauge to register even if nothing has scraped `/metrics` yet,
/// so `main.rs` can call this once at startup and keep the `Lazy` init off
/// the request path.
pub fn init() {
    Lazy::force(&QUEUED_TXS);
    Lazy::force(&INCLUDED_TXS);
    Lazy::force(&DROPPED_TXS);
    Lazy::force(&CONFIRMED_BATCHES);
    Lazy::force(&PENDING_BATCHES);
    Lazy::force(&FAILED_BATCHES);
    Lazy::force(&LAST_L1_CONFIRMATION);
}

/// Re-read the handful of gauges spec.md §6 implies (the `sequencer_getStats`
/// fields plus queue depth and last L1 confirmation) from the Store, then
/// render the Prometheus text exposition format.
pub async fn render(store: &Store) -> Result<String, StoreError> {
    QUEUED_TXS.set(store.pending_count().await?);
    INCLUDED_TXS.set(store.count_by_state(crate::types::TxState::L2Included).await?);
    DROPPED_TXS.set(store.count_dropped().await?);
    CONFIRMED_BATCHES.set(
        store.count_batches_in_state(BatchState::L1Included).await?
            + store.count_batches_in_state(BatchState::Finalized).await?,
    );
    PENDING_BATCHES.set(
        store.count_batches_in_state(BatchState::Sealed).await?
            + store.count_batches_in_state(BatchState::Submitted).await?,
    );
    FAILED_BATCHES.set(store.count_batches_in_state(BatchState::Failed).await?);
    LAST_L1_CONFIRMATION.set(store.last_confirmed_at().await?.unwrap_or(0));

    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&metric_families, &mut buffer)
        .expect("prometheus text encoding is infallible for counters/gauges");
    Ok(String::from_utf8(buffer).expect("prometheus text output is always UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    #[tokio::test]
    async fn renders_prometheus_text_with_known_gauges() {
        let store = test_store().await;
        let text = render(&store).await.unwrap();
        assert!(text.contains("sequencer_queued_txs"));
        assert!(text.contains("sequencer_last_l1_confirmation_timestamp"));
    }
}
