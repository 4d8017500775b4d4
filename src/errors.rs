//! Error Taxonomy
//!
//! The kinds below mirror the error table in §7 of the design: each one
//! pins down where it is raised and how far it is allowed to propagate.
//! RPC-facing code converts these into JSON-RPC error objects; background
//! loops match on them to decide whether to retry, give up, or alert.

use thiserror::Error;

/// Errors raised by the Store (§4.1).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store busy: contention exceeded the busy timeout")]
    Busy,
    #[error("uniqueness constraint violated: {0}")]
    Conflict(String),
    #[error("row not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    /// Classify a raw `sqlx::Error` into the taxonomy's `Busy`/`Conflict`
    /// buckets where SQLite's own error codes let us, otherwise fall back
    /// to the generic `Database` wrapper.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if let Some(code) = db_err.code() {
                match code.as_ref() {
                    "5" | "6" => return StoreError::Busy, // SQLITE_BUSY / SQLITE_LOCKED
                    _ => {}
                }
            }
            if db_err.is_unique_violation() {
                return StoreError::Conflict(db_err.message().to_string());
            }
        }
        StoreError::Database(err)
    }
}

/// Errors raised during ingress validation (§4.2). Each variant corresponds
/// to exactly one numbered step in the validation pipeline; the first one
/// to fire is the one reported, and no pool row is written.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngressError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("Sequencer busy")]
    Busy,
    #[error("unsupported transaction type")]
    UnsupportedType,
    #[error("max fee per gas below floor")]
    FeeTooLow,
    #[error("EIP-1559 transaction missing maxPriorityFeePerGas")]
    MissingPriorityFee,
    #[error("gas limit exceeds block gas limit")]
    GasLimitTooHigh,
    #[error("intrinsic gas {intrinsic} exceeds gas limit {limit}")]
    IntrinsicGasExceedsLimit { intrinsic: u64, limit: u64 },
    #[error("signature recovery failed")]
    InvalidSignature,
    #[error("replacement fee not high enough: need >= {required}, got {got}")]
    Underpriced { required: String, got: String },
}

impl IngressError {
    /// JSON-RPC error code per the taxonomy: malformed/policy failures map
    /// to 400-equivalents, back-pressure maps to a retryable 503-equivalent.
    pub fn rpc_code(&self) -> i32 {
        match self {
            IngressError::Busy => -32000,
            IngressError::Underpriced { .. } => -32001,
            _ => -32602,
        }
    }
}

/// Errors raised while posting a batch to L1 or the DA aggregator (§4.4).
#[derive(Debug, Error)]
pub enum PosterError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("transient RPC failure: {0}")]
    Rpc(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("batch not in a postable state")]
    NotPostable,
    #[error("attempt failed: {0}")]
    AttemptFailed(String),
}

/// Top-level error type for the RPC/HTTP surface and process wiring.
#[derive(Debug, Error)]
pub enum SequencerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ingress(#[from] IngressError),
    #[error(transparent)]
    Poster(#[from] PosterError),
    #[error("configuration error: {0}")]
    Config(String),
}
