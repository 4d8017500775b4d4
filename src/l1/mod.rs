//! Layer 1 Integration Module
//!
//! Thin RPC client over the configured L1 node, shared by the Batch Maker
//! (fee estimation, head block), the Poster (nonce, broadcast, receipts),
//! and the Inclusion Monitor (block hash at height, for reorg detection).

mod l2_client;
mod listener;
pub use l2_client::L2Client;
pub use listener::{L1Client, ReceiptInfo};