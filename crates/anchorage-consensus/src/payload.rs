//! Anchor transaction payload
//!
//! Compact encoding carried in an OP_RETURN output of the external anchor
//! transaction:
//!
//! | Field | Size |
//! |-------|------|
//! | magic `ANCR` | 4 |
//! | signatures | 1 |
//! | defi block height (LE) | 4 |
//! | creation height (LE) | 4 |
//! | defi block hash | 32 |
//! | reward address length | 1 |
//! | reward address | ≤ 34 |

use anchorage_core::constants::MAX_OP_RETURN_SIZE;
use anchorage_core::{AnchorError, BlockHash, Hash256, Result};

pub const ANCHOR_MAGIC: [u8; 4] = *b"ANCR";

/// Longest reward address that keeps the payload within one OP_RETURN
pub const MAX_REWARD_ADDRESS_LEN: usize = 34;

const HEADER_LEN: usize = 4 + 1 + 4 + 4 + 32 + 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchorPayload {
    pub signatures: u8,
    pub defi_block_height: u64,
    pub creation_height: u64,
    pub defi_block_hash: BlockHash,
    pub reward_address: String,
}

impl AnchorPayload {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let address = self.reward_address.as_bytes();
        if address.is_empty() || address.len() > MAX_REWARD_ADDRESS_LEN {
            return Err(AnchorError::InvalidPayload(format!(
                "reward address length {} outside 1..={}",
                address.len(),
                MAX_REWARD_ADDRESS_LEN
            )));
        }
        let defi_height = u32::try_from(self.defi_block_height)
            .map_err(|_| AnchorError::InvalidPayload("defi height exceeds u32".to_string()))?;
        let creation_height = u32::try_from(self.creation_height)
            .map_err(|_| AnchorError::InvalidPayload("creation height exceeds u32".to_string()))?;

        let mut out = Vec::with_capacity(HEADER_LEN + address.len());
        out.extend_from_slice(&ANCHOR_MAGIC);
        out.push(self.signatures);
        out.extend_from_slice(&defi_height.to_le_bytes());
        out.extend_from_slice(&creation_height.to_le_bytes());
        out.extend_from_slice(self.defi_block_hash.as_bytes());
        out.push(address.len() as u8);
        out.extend_from_slice(address);

        debug_assert!(out.len() <= MAX_OP_RETURN_SIZE);
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(AnchorError::InvalidPayload(format!(
                "payload too short: {} bytes",
                data.len()
            )));
        }
        if data.len() > MAX_OP_RETURN_SIZE {
            return Err(AnchorError::InvalidPayload(format!(
                "payload too long: {} bytes",
                data.len()
            )));
        }
        if data[..4] != ANCHOR_MAGIC {
            return Err(AnchorError::InvalidPayload("bad magic".to_string()));
        }

        let signatures = data[4];
        let defi_block_height = u32::from_le_bytes([data[5], data[6], data[7], data[8]]) as u64;
        let creation_height = u32::from_le_bytes([data[9], data[10], data[11], data[12]]) as u64;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&data[13..45]);
        let address_len = data[45] as usize;

        let address = &data[HEADER_LEN..];
        if address.len() != address_len || address_len == 0 {
            return Err(AnchorError::InvalidPayload(format!(
                "reward address length {} does not match {} remaining bytes",
                address_len,
                address.len()
            )));
        }
        let reward_address = std::str::from_utf8(address)
            .map_err(|_| AnchorError::InvalidPayload("reward address is not UTF-8".to_string()))?
            .to_string();

        Ok(Self {
            signatures,
            defi_block_height,
            creation_height,
            defi_block_hash: Hash256::new(hash),
            reward_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(address: &str) -> AnchorPayload {
        AnchorPayload {
            signatures: 3,
            defi_block_height: 15,
            creation_height: 45,
            defi_block_hash: Hash256::from_content(b"block 15"),
            reward_address: address.to_string(),
        }
    }

    #[test]
    fn test_roundtrip_fits_op_return() {
        let p = payload("mwsZw8nF7pKxWH8eoKL9tPxTpaFkz7QeLU");
        let bytes = p.encode().unwrap();

        assert_eq!(bytes.len(), 80);
        assert_eq!(AnchorPayload::decode(&bytes).unwrap(), p);
    }

    #[test]
    fn test_rejects_long_address() {
        let long = "x".repeat(MAX_REWARD_ADDRESS_LEN + 1);
        assert!(matches!(
            payload(&long).encode(),
            Err(AnchorError::InvalidPayload(_))
        ));
        assert!(payload("").encode().is_err());
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = payload("addr").encode().unwrap();
        bytes[0] = b'X';
        assert!(AnchorPayload::decode(&bytes).is_err());
    }

    #[test]
    fn test_rejects_truncated() {
        let bytes = payload("addr").encode().unwrap();
        assert!(AnchorPayload::decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(AnchorPayload::decode(&bytes[..20]).is_err());
    }

    #[test]
    fn test_rejects_height_overflow() {
        let mut p = payload("addr");
        p.defi_block_height = u64::from(u32::MAX) + 1;
        assert!(p.encode().is_err());
    }
}
