//! Core type definitions for Anchorage
//!
//! Identifiers shared by every crate in the workspace: 256-bit hashes for
//! local blocks, external transactions and anchors, and validator identities
//! derived from Ed25519 public keys.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// 256-bit hash used for local block hashes, external tx hashes and anchor hashes
///
/// Serialized as a hex string in human-readable formats (JSON-RPC, TOML) and as
/// raw bytes in binary formats (bincode storage).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash256 {
    hash: [u8; 32],
}

/// Hash of a local block
pub type BlockHash = Hash256;

/// Hash of a transaction (external anchor tx or local reward payout tx)
pub type TxHash = Hash256;

impl Hash256 {
    /// Zero hash, the `previous_anchor` of the first anchor
    pub const ZERO: Self = Self { hash: [0u8; 32] };

    /// Create from raw bytes
    pub fn new(hash: [u8; 32]) -> Self {
        Self { hash }
    }

    /// BLAKE3 hash of arbitrary content
    pub fn from_content(content: &[u8]) -> Self {
        Self {
            hash: *blake3::hash(content).as_bytes(),
        }
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.hash
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// Parse from a 64-character hex string
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let hash: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self { hash })
    }

    pub fn is_zero(&self) -> bool {
        self.hash == [0u8; 32]
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.hash.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Self::from_hex(&s).map_err(D::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(Self::new)
        }
    }
}

/// ValidatorId - masternode identity, BLAKE3 hash of the operator public key
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValidatorId {
    id: [u8; 32],
}

impl ValidatorId {
    pub fn new(id: [u8; 32]) -> Self {
        Self { id }
    }

    pub fn from_public_key(public_key: &[u8]) -> Self {
        Self {
            id: *blake3::hash(public_key).as_bytes(),
        }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.id
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.id)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Hash256::from_hex(s).map(|h| Self::new(*h.as_bytes()))
    }
}

impl fmt::Debug for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValidatorId({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..12])
    }
}

impl Serialize for ValidatorId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.id.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for ValidatorId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Self::from_hex(&s).map_err(D::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(Self::new)
        }
    }
}

/// Protocol constants (reference configuration)
pub mod constants {
    /// Local blocks between anchor candidates
    pub const ANCHOR_FREQUENCY: u64 = 15;

    /// Chain time an anchored block must be buried under (3 hours)
    pub const ANCHOR_DEPTH_SECS: i64 = 3 * 60 * 60;

    /// External confirmations after which an anchor is active
    pub const ACTIVATION_THRESHOLD: u64 = 6;

    /// Members per auth team and per confirm team
    pub const TEAM_SIZE: usize = 3;

    /// Distinct signers required for auth and reward quorums
    pub const ANCHOR_QUORUM: usize = 3;

    /// Masternodes must have minted within this window to join a team (2 weeks)
    pub const TEAM_LOOKBACK_SECS: i64 = 14 * 24 * 60 * 60;

    /// Teams are reseeded from the block hash at multiples of this height
    pub const TEAM_CHANGE_PERIOD: u64 = 120;

    /// Largest payload a standard OP_RETURN output relays
    pub const MAX_OP_RETURN_SIZE: usize = 80;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_hex_roundtrip() {
        let hash = Hash256::from_content(b"block 15");
        let parsed = Hash256::from_hex(&hash.to_hex()).unwrap();

        assert_eq!(hash, parsed);
        assert!(!hash.is_zero());
        assert!(Hash256::ZERO.is_zero());
    }

    #[test]
    fn test_hash_from_hex_rejects_short_input() {
        assert!(Hash256::from_hex("abcd").is_err());
        assert!(Hash256::from_hex("zz").is_err());
    }

    #[test]
    fn test_hash_serializes_as_hex_in_json() {
        let json = serde_json::to_string(&Hash256::ZERO).unwrap();
        assert_eq!(json, format!("\"{}\"", "0".repeat(64)));

        let back: Hash256 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Hash256::ZERO);
    }

    #[test]
    fn test_hash_serializes_as_bytes_in_bincode() {
        let hash = Hash256::new([7u8; 32]);
        let bytes = bincode::serialize(&hash).unwrap();

        assert_eq!(bytes.len(), 32);
        assert_eq!(bincode::deserialize::<Hash256>(&bytes).unwrap(), hash);
    }

    #[test]
    fn test_validator_id_from_public_key() {
        let a = ValidatorId::from_public_key(&[1u8; 32]);
        let b = ValidatorId::from_public_key(&[2u8; 32]);

        assert_ne!(a, b);
        assert_eq!(ValidatorId::from_hex(&a.to_hex()).unwrap(), a);
    }

    #[test]
    fn test_hash_ordering_is_lexicographic() {
        let mut low = [0u8; 32];
        low[0] = 1;
        let mut high = [0u8; 32];
        high[0] = 2;

        assert!(Hash256::new(low) < Hash256::new(high));
    }
}
