//! Process entrypoint: wires the Store, Ingress, Batch Maker, Poster, and
//! Inclusion Monitor around one SQLite database and starts the JSON-RPC/
//! HTTP surface. Shutdown is cooperative: a `CancellationToken` signals
//! every background loop to stop, and the process waits (with a bound) for
//! them to finish their current tick before the Store connection drops.

use sequencer::api::Server;
use sequencer::batch::BatchMaker;
use sequencer::config::Config;
use sequencer::ingress::Ingress;
use sequencer::l1::{L1Client, L2Client};
use sequencer::monitor::InclusionMonitor;
use sequencer::poster::Poster;
use sequencer::store::Store;
use sequencer::types::BatchState;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Cadence for the Poster's confirm/escalate tick. Not part of the closed
/// env-var set (spec.md §6), so this stays a built-in constant.
const POSTER_TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Upper bound on how long shutdown waits for in-flight background work.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let file_overrides = Config::load_file("config/default.toml").ok();
    let config = Config::resolve(file_overrides)?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(config.log_level.clone()))
        .init();

    info!(db_path = %config.store.db_path, l1_rpc = %config.l1.rpc_url, l2_rpc = %config.l2.rpc_url, "starting sequencer");

    sequencer::metrics::init();

    let store = Store::connect(&config.store.db_path).await?;
    let l1 = L1Client::new(&config.l1.rpc_url)?;
    let l2 = L2Client::new(&config.l2.rpc_url)?;

    let ingress = Ingress::new(store.clone(), &config);
    let batch_maker = BatchMaker::new(store.clone(), l1.clone(), &config);
    let poster = Poster::new(store.clone(), l1.clone(), &config)?;
    let monitor = InclusionMonitor::new(store.clone(), l1.clone(), l2.clone(), &config);

    let cancel = CancellationToken::new();

    let batch_task = tokio::spawn(run_batch_loop(
        store.clone(),
        batch_maker,
        poster.clone(),
        config.batch.batch_interval_ms,
        cancel.clone(),
    ));
    let poster_task = tokio::spawn(run_poster_loop(poster, cancel.clone()));

    let l1_monitor = monitor.clone();
    let l1_cancel = cancel.clone();
    let l1_monitor_task = tokio::spawn(async move { l1_monitor.run_l1_loop(l1_cancel).await });

    let l2_monitor = monitor.clone();
    let l2_cancel = cancel.clone();
    let l2_monitor_task = tokio::spawn(async move { l2_monitor.run_l2_loop(l2_cancel).await });

    let server = Server::new(config.clone(), store.clone(), ingress);
    let server_cancel = cancel.clone();
    let server_task = tokio::spawn(async move {
        tokio::select! {
            result = server.start() => {
                if let Err(err) = result {
                    error!(%err, "JSON-RPC server exited with an error");
                }
            }
            _ = server_cancel.cancelled() => {}
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping background loops");
    cancel.cancel();

    let shutdown = async {
        let _ = tokio::join!(batch_task, poster_task, l1_monitor_task, l2_monitor_task, server_task);
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, shutdown).await.is_err() {
        warn!("background loops did not finish within the shutdown grace period");
    }

    info!("sequencer stopped");
    Ok(())
}

/// Drives `should_create_batch` → `create_batch` → `post_batch` on a fixed
/// tick (spec.md §4.3), and on every tick also retries any sealed batch
/// still without a live attempt — the restart-safe path for a batch that
/// was sealed just before a crash and never got its first post attempt.
async fn run_batch_loop(
    store: Store,
    batch_maker: BatchMaker,
    poster: Poster,
    interval_ms: u64,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("batch maker loop shutting down");
                return;
            }
            _ = interval.tick() => {}
        }

        match batch_maker.should_create_batch().await {
            Ok(true) => match batch_maker.create_batch().await {
                Ok(Some(batch_id)) => {
                    if let Err(err) = poster.post_batch(batch_id).await {
                        warn!(batch_id, %err, "initial batch post failed");
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(%err, "batch creation failed"),
            },
            Ok(false) => {}
            Err(err) => warn!(%err, "should_create_batch check failed"),
        }

        match store.batches_in_state(BatchState::Sealed).await {
            Ok(sealed) => {
                for batch in sealed {
                    if let Err(err) = poster.post_batch(batch.id).await {
                        warn!(batch_id = batch.id, %err, "retrying sealed batch post failed");
                    }
                }
            }
            Err(err) => warn!(%err, "failed to list sealed batches"),
        }
    }
}

async fn run_poster_loop(poster: Poster, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(POSTER_TICK_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("poster loop shutting down");
                return;
            }
            _ = interval.tick() => {}
        }
        if let Err(err) = poster.tick().await {
            warn!(%err, "poster tick failed");
        }
    }
}
