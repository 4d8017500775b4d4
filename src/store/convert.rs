//! Row <-> domain-type conversions shared by every query module.
//!
//! U256 values are stored as 64-char zero-padded lowercase hex so that a
//! plain SQL `ORDER BY` sorts them numerically — the engine has no native
//! 256-bit integer type, and comparing decimal strings lexicographically
//! would put `"9"` after `"10"`.

use ethers::types::{H256, U256};

pub fn u256_to_sortable_hex(value: U256) -> String {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    hex::encode(bytes)
}

pub fn u256_from_sortable_hex(s: &str) -> Result<U256, hex::FromHexError> {
    let bytes = hex::decode(s)?;
    Ok(U256::from_big_endian(&bytes))
}

pub fn h256_to_hex(value: H256) -> String {
    format!("{:#x}", value)
}

#[derive(Debug, thiserror::Error)]
#[error("invalid hex-encoded 32-byte value")]
pub struct HexParseError;

pub fn h256_from_hex(s: &str) -> Result<H256, HexParseError> {
    let trimmed = s.trim_start_matches("0x");
    let bytes = hex::decode(trimmed).map_err(|_| HexParseError)?;
    if bytes.len() != 32 {
        return Err(HexParseError);
    }
    Ok(H256::from_slice(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u256_hex_round_trips_and_sorts_numerically() {
        let a = U256::from(5u64);
        let b = U256::from(10u64);
        let ha = u256_to_sortable_hex(a);
        let hb = u256_to_sortable_hex(b);
        assert!(ha < hb);
        assert_eq!(u256_from_sortable_hex(&ha).unwrap(), a);
        assert_eq!(u256_from_sortable_hex(&hb).unwrap(), b);
    }

    #[test]
    fn h256_hex_round_trips() {
        let h = H256::repeat_byte(0xab);
        let s = h256_to_hex(h);
        assert_eq!(h256_from_hex(&s).unwrap(), h);
    }
}
