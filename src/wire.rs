//! Facet Batch Wire Format
//!
//! Bit-exact framing per spec.md §6:
//!
//! ```text
//!   MAGIC_PREFIX : 8 bytes
//!   LENGTH       : 4 bytes, uint32 big-endian, length of the following RLP
//!   PAYLOAD      : RLP( [ BatchData ] )
//!
//!   BatchData    : RLP([ version:u8, chainId:uint, role:bytes,
//!                        targetL1Block:uint, transactions:[raw_tx...],
//!                        extraData:bytes ])
//! ```
//!
//! The outer single-element list reserves room for a future
//! `[BatchData, signature]` priority-batch variant (spec.md §4.3); this
//! implementation only ever frames the forced variant (`role` empty).

use ethers::types::H256;
use ethers::utils::keccak256;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

/// `role` is always empty bytes in this implementation — every batch this
/// sequencer frames is a forced batch (spec.md §9 Open Questions).
pub const ROLE_FORCED: &[u8] = &[];

pub const BATCH_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchData {
    pub version: u8,
    pub chain_id: u64,
    pub role: Vec<u8>,
    pub target_l1_block: u64,
    pub transactions: Vec<Vec<u8>>,
    pub extra_data: Vec<u8>,
}

impl BatchData {
    pub fn forced(chain_id: u64, target_l1_block: u64, transactions: Vec<Vec<u8>>) -> Self {
        Self {
            version: BATCH_VERSION,
            chain_id,
            role: ROLE_FORCED.to_vec(),
            target_l1_block,
            transactions,
            extra_data: Vec::new(),
        }
    }

    /// `content_hash = keccak256(rlp(BatchData))` — spec.md §4.3/§8 P3.
    pub fn content_hash(&self) -> H256 {
        H256::from_slice(&keccak256(rlp::encode(self)))
    }
}

impl Encodable for BatchData {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(6);
        s.append(&self.version);
        s.append(&self.chain_id);
        s.append(&self.role);
        s.append(&self.target_l1_block);
        s.begin_list(self.transactions.len());
        for tx in &self.transactions {
            s.append(tx);
        }
        s.append(&self.extra_data);
    }
}

impl Decodable for BatchData {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 6 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let transactions_rlp = rlp.at(4)?;
        let mut transactions = Vec::with_capacity(transactions_rlp.item_count()?);
        for item in transactions_rlp.iter() {
            transactions.push(item.data()?.to_vec());
        }
        Ok(BatchData {
            version: rlp.val_at(0)?,
            chain_id: rlp.val_at(1)?,
            role: rlp.val_at(2)?,
            target_l1_block: rlp.val_at(3)?,
            transactions,
            extra_data: rlp.val_at(5)?,
        })
    }
}

/// Frame a sealed `BatchData` into the on-wire bytes handed to the Poster.
pub fn encode_wire_format(magic_prefix: [u8; 8], batch: &BatchData) -> Vec<u8> {
    let mut outer = RlpStream::new_list(1);
    outer.append(batch);
    let payload = outer.out().to_vec();

    let mut wire = Vec::with_capacity(8 + 4 + payload.len());
    wire.extend_from_slice(&magic_prefix);
    wire.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    wire.extend_from_slice(&payload);
    wire
}

#[derive(Debug, thiserror::Error)]
pub enum WireDecodeError {
    #[error("payload too short to contain magic prefix and length")]
    Truncated,
    #[error("magic prefix mismatch")]
    MagicMismatch,
    #[error("declared length does not match remaining bytes")]
    LengthMismatch,
    #[error("rlp decode error: {0}")]
    Rlp(#[from] DecoderError),
}

/// Strip `MAGIC_PREFIX`, read `LENGTH`, and RLP-decode back to `BatchData`.
/// The inverse of `encode_wire_format`; round-tripping any `BatchData`
/// through these two functions reproduces the original value exactly
/// (spec.md §8, Encode/decode property).
pub fn decode_wire_format(magic_prefix: [u8; 8], wire: &[u8]) -> Result<BatchData, WireDecodeError> {
    if wire.len() < 12 {
        return Err(WireDecodeError::Truncated);
    }
    if wire[0..8] != magic_prefix {
        return Err(WireDecodeError::MagicMismatch);
    }
    let length = u32::from_be_bytes([wire[8], wire[9], wire[10], wire[11]]) as usize;
    let payload = &wire[12..];
    if payload.len() != length {
        return Err(WireDecodeError::LengthMismatch);
    }
    let outer = Rlp::new(payload);
    let batch: BatchData = outer.val_at(0)?;
    Ok(batch)
}

/// Scan a buffer (e.g. an L1 block's transaction inputs) for the magic
/// prefix and decode the batch that follows it, per spec.md §6
/// ("consumers scan L1 blocks for MAGIC_PREFIX and parse the following
/// LENGTH || RLP").
pub fn scan_for_batch(magic_prefix: [u8; 8], haystack: &[u8]) -> Option<BatchData> {
    let pos = haystack
        .windows(magic_prefix.len())
        .position(|window| window == magic_prefix)?;
    decode_wire_format(magic_prefix, &haystack[pos..]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BatchData {
        BatchData::forced(0xface, 42, vec![vec![0xde, 0xad, 0xbe, 0xef], vec![0x01]])
    }

    #[test]
    fn round_trips_through_wire_format() {
        let magic = [0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x23, 0x45];
        let batch = sample();
        let wire = encode_wire_format(magic, &batch);
        let decoded = decode_wire_format(magic, &wire).unwrap();
        assert_eq!(batch, decoded);
    }

    #[test]
    fn content_hash_is_deterministic() {
        let batch = sample();
        assert_eq!(batch.content_hash(), batch.content_hash());
        let mut other = batch.clone();
        other.target_l1_block += 1;
        assert_ne!(batch.content_hash(), other.content_hash());
    }

    #[test]
    fn rejects_wrong_magic_prefix() {
        let magic = [0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x23, 0x45];
        let wire = encode_wire_format(magic, &sample());
        let wrong = [0xff; 8];
        assert!(matches!(decode_wire_format(wrong, &wire), Err(WireDecodeError::MagicMismatch)));
    }

    #[test]
    fn scan_finds_batch_in_larger_buffer() {
        let magic = [0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x23, 0x45];
        let batch = sample();
        let wire = encode_wire_format(magic, &batch);
        let mut haystack = vec![0xaa, 0xbb, 0xcc];
        haystack.extend_from_slice(&wire);
        haystack.extend_from_slice(&[0xdd, 0xee]);
        let found = scan_for_batch(magic, &haystack).unwrap();
        assert_eq!(found, batch);
    }
}
