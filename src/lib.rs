//! A permissionless micro-sequencer for an L2 rollup: accepts signed
//! transactions over JSON-RPC, batches them deterministically, and commits
//! each batch to L1 as calldata (or via a DA aggregator), tracking
//! inclusion and reorgs through to L2 finality.

pub mod api; // JSON-RPC + HTTP surface.
pub mod batch; // Batch Maker: selection and framing of sealed batches.
pub mod config; // Configuration: built-in defaults, optional file, closed env-var set.
pub mod errors; // Error taxonomy shared across every module.
pub mod ingress; // Ingress: admission pipeline for raw transactions.
pub mod l1; // L1/L2 RPC clients.
pub mod metrics; // Prometheus text exposition for GET /metrics.
pub mod monitor; // Inclusion Monitor: L1 reorg/finality and L2 inclusion tracking.
pub mod poster; // Poster: L1 submission backends (Direct, Aggregator).
pub mod store; // Durable SQLite-backed Store: the single source of truth.
pub mod types; // Core data model shared by every pipeline stage.
pub mod wire; // Facet batch wire format (framing, RLP, content hash).

pub use config::Config;
pub use errors::SequencerError;
pub use store::Store;
