//! JSON-RPC + HTTP Surface
//!
//! `eth_sendRawTransaction` runs admission through Ingress; `eth_chainId`,
//! `sequencer_getTxStatus`, and `sequencer_getStats` are served from the
//! Store; anything else is proxied verbatim to the L2 node so this process
//! is a drop-in endpoint for ordinary `eth_*`/`net_*`/`web3_*` callers
//! (spec.md §5). `GET /health` and `GET /metrics` round out the surface.

use crate::config::Config;
use crate::ingress::{AdmissionOutcome, Ingress};
use crate::metrics;
use crate::store::Store;
use crate::types::{HealthResponse, Stats, TxStatusResponse};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ethers::types::H256;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, warn};

/// A pending batch with no confirmation at all for this long marks
/// `GET /health` unhealthy (spec.md §6).
const HEALTH_STALENESS_SECONDS: i64 = 300;

struct Inner {
    config: Config,
    store: Store,
    ingress: Ingress,
    http: reqwest::Client,
    start_time: i64,
}

#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl Server {
    pub fn new(config: Config, store: Store, ingress: Ingress) -> Self {
        let inner = Inner {
            config,
            store,
            ingress,
            http: reqwest::Client::new(),
            start_time: now(),
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/", post(handle_rpc))
            .route("/health", get(handle_health))
            .route("/metrics", get(handle_metrics))
            .with_state(self)
    }

    pub async fn start(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.inner.config.api.host, self.inner.config.api.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(%addr, "JSON-RPC server listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn handle_rpc(State(server): State<Server>, body: String) -> Response {
    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(err) => {
            return Json(JsonRpcResponse {
                jsonrpc: "2.0",
                id: Value::Null,
                result: None,
                error: Some(JsonRpcError { code: -32700, message: format!("parse error: {err}") }),
            })
            .into_response();
        }
    };

    let id = request.id.clone();
    let result = dispatch(&server, &request).await;

    let response = match result {
        Ok(value) => JsonRpcResponse { jsonrpc: "2.0", id, result: Some(value), error: None },
        Err((code, message)) => JsonRpcResponse { jsonrpc: "2.0", id, result: None, error: Some(JsonRpcError { code, message }) },
    };
    Json(response).into_response()
}

async fn dispatch(server: &Server, request: &JsonRpcRequest) -> Result<Value, (i32, String)> {
    match request.method.as_str() {
        "eth_sendRawTransaction" => handle_send_raw_transaction(server, &request.params).await,
        "eth_chainId" => Ok(json!(format!("0x{:x}", server.inner.config.l2.chain_id))),
        "sequencer_getTxStatus" => handle_get_tx_status(server, &request.params).await,
        "sequencer_getStats" => handle_get_stats(server).await,
        _ => proxy_to_l2(server, request).await,
    }
}

async fn handle_send_raw_transaction(server: &Server, params: &Value) -> Result<Value, (i32, String)> {
    let raw_hex = params
        .as_array()
        .and_then(|a| a.first())
        .and_then(|v| v.as_str())
        .ok_or_else(|| (-32602, "expected [rawTransaction] as a hex string".to_string()))?;

    let raw = hex::decode(raw_hex.trim_start_matches("0x"))
        .map_err(|e| (-32602, format!("invalid hex: {e}")))?;

    match server.inner.ingress.admit(&raw).await {
        Ok((hash, AdmissionOutcome::Admitted | AdmissionOutcome::AlreadyKnown | AdmissionOutcome::Replaced { .. })) => {
            Ok(json!(format!("{:#x}", hash)))
        }
        Err(err) => {
            warn!(%err, "eth_sendRawTransaction rejected");
            Err((err.rpc_code(), err.to_string()))
        }
    }
}

async fn handle_get_tx_status(server: &Server, params: &Value) -> Result<Value, (i32, String)> {
    let hash_hex = params
        .as_array()
        .and_then(|a| a.first())
        .and_then(|v| v.as_str())
        .ok_or_else(|| (-32602, "expected [txHash] as a hex string".to_string()))?;
    let hash = H256::from_str(hash_hex).map_err(|e| (-32602, format!("invalid transaction hash: {e}")))?;

    let tx = server
        .inner
        .store
        .get_transaction(hash)
        .await
        .map_err(|e| (-32000, e.to_string()))?;

    let Some(tx) = tx else {
        return Ok(serde_json::to_value(TxStatusResponse::unknown()).unwrap());
    };

    let mut response = TxStatusResponse {
        status: tx.state.as_str().to_string(),
        batch_id: tx.batch_id,
        batch_state: None,
        submission_mode: None,
        l1_tx_hash: None,
        da_request_id: None,
        l1_block: None,
        l2_block: tx.l2_block_number,
        drop_reason: tx.drop_reason,
    };

    if let Some(batch_id) = tx.batch_id {
        if let Some(batch) = server.inner.store.get_batch(batch_id).await.map_err(|e| (-32000, e.to_string()))? {
            response.batch_state = Some(batch.state.as_str().to_string());
        }
        if let Some(attempt) = server
            .inner
            .store
            .latest_relevant_attempt(batch_id)
            .await
            .map_err(|e| (-32000, e.to_string()))?
        {
            response.submission_mode = Some(attempt.submission_mode());
            response.l1_tx_hash = attempt.l1_tx_hash;
            response.da_request_id = attempt.aggregator_request_id;
            response.l1_block = attempt.block_number;
        }
    }

    Ok(serde_json::to_value(response).unwrap())
}

async fn handle_get_stats(server: &Server) -> Result<Value, (i32, String)> {
    let stats = build_stats(&server.inner.store).await.map_err(|e| (-32000, e.to_string()))?;
    Ok(serde_json::to_value(stats).unwrap())
}

async fn build_stats(store: &Store) -> Result<Stats, crate::errors::StoreError> {
    Ok(Stats {
        queued_txs: store.pending_count().await?,
        included_txs: store.count_by_state(crate::types::TxState::L2Included).await?,
        dropped_txs: store.count_dropped().await?,
        confirmed_batches: store.count_batches_in_state(crate::types::BatchState::L1Included).await?
            + store.count_batches_in_state(crate::types::BatchState::Finalized).await?,
        pending_batches: store.count_batches_in_state(crate::types::BatchState::Sealed).await?
            + store.count_batches_in_state(crate::types::BatchState::Submitted).await?,
    })
}

/// Any method this process doesn't special-case is forwarded byte-for-byte
/// to `L2_RPC_URL` so ordinary wallet/explorer traffic can point at this
/// sequencer as if it were the L2 node itself (spec.md §5 passthrough).
async fn proxy_to_l2(server: &Server, request: &JsonRpcRequest) -> Result<Value, (i32, String)> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": request.id,
        "method": request.method,
        "params": request.params,
    });

    let response = server
        .inner
        .http
        .post(&server.inner.config.l2.rpc_url)
        .json(&body)
        .send()
        .await
        .map_err(|e| (-32003, format!("L2 passthrough failed: {e}")))?;

    let value: Value = response.json().await.map_err(|e| (-32003, format!("L2 passthrough decode failed: {e}")))?;

    if let Some(error) = value.get("error") {
        let message = error.get("message").and_then(|m| m.as_str()).unwrap_or("upstream error").to_string();
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(-32603) as i32;
        return Err((code, message));
    }
    Ok(value.get("result").cloned().unwrap_or(Value::Null))
}

async fn handle_health(State(server): State<Server>) -> Response {
    let store = &server.inner.store;
    let queued = store.pending_count().await.unwrap_or(0);
    let pending_batches = store.count_batches_in_state(crate::types::BatchState::Sealed).await.unwrap_or(0)
        + store.count_batches_in_state(crate::types::BatchState::Submitted).await.unwrap_or(0);
    let last_l1_confirmation = store.last_confirmed_at().await.unwrap_or(None);

    let stale = match last_l1_confirmation {
        Some(ts) => now() - ts > HEALTH_STALENESS_SECONDS,
        None => now() - server.inner.start_time > HEALTH_STALENESS_SECONDS,
    };
    let over_capacity = queued as usize >= server.inner.config.ingress.max_pending_txs;
    let healthy = !stale && !over_capacity;

    let response = HealthResponse {
        healthy,
        uptime: (now() - server.inner.start_time).max(0) as u64,
        queued_txs: queued,
        pending_batches,
        last_l1_confirmation,
    };

    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(response)).into_response()
}

async fn handle_metrics(State(server): State<Server>) -> Response {
    match metrics::render(&server.inner.store).await {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(err) => {
            error!(%err, "failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}
