//! Devnet genesis
//!
//! Genesis masternode keys are derived from a seed, so every node started
//! with the same seed agrees on the validator set and on the local chain.

use anchorage_crypto::ValidatorKey;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Chain time of devnet block 0
pub const DEVNET_GENESIS_TIME: i64 = 1_600_000_000;

const GENESIS_TAG: &[u8] = b"ANCHORAGE_DEVNET_GENESIS_V1";

/// Genesis configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    /// Seed the validator keys are derived from
    pub seed: String,
    /// Genesis timestamp (unix seconds)
    pub timestamp: i64,
    /// Genesis hash (BLAKE3), hex
    pub genesis_hash: String,
    /// Genesis masternodes in minting order
    pub validators: Vec<GenesisValidator>,
}

/// Genesis masternode
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    /// Validator id (BLAKE3 hash of public key), hex
    pub id: String,
    /// Ed25519 public key, hex
    pub public_key: String,
    pub name: String,
}

/// Operator key of genesis masternode `index`
pub fn devnet_key(seed: &str, index: usize) -> ValidatorKey {
    let mut hasher = blake3::Hasher::new();
    hasher.update(seed.as_bytes());
    hasher.update(&(index as u64).to_le_bytes());
    ValidatorKey::from_seed(*hasher.finalize().as_bytes())
}

pub fn devnet_keys(seed: &str, count: usize) -> Vec<ValidatorKey> {
    (0..count).map(|i| devnet_key(seed, i)).collect()
}

/// Build the devnet genesis for `count` masternodes
pub fn generate_genesis(seed: &str, count: usize) -> Genesis {
    let keys = devnet_keys(seed, count);

    let mut hasher = blake3::Hasher::new();
    hasher.update(seed.as_bytes());
    hasher.update(&DEVNET_GENESIS_TIME.to_le_bytes());
    hasher.update(GENESIS_TAG);
    for key in &keys {
        hasher.update(key.id().as_bytes());
    }
    let genesis_hash = hex::encode(hasher.finalize().as_bytes());

    let validators = keys
        .iter()
        .enumerate()
        .map(|(i, key)| GenesisValidator {
            id: key.id().to_hex(),
            public_key: hex::encode(key.public_key()),
            name: format!("Masternode {}", i + 1),
        })
        .collect();

    Genesis {
        seed: seed.to_string(),
        timestamp: DEVNET_GENESIS_TIME,
        genesis_hash,
        validators,
    }
}

/// Read `path`, or generate and write it
///
/// An existing file generated from a different seed or size is rejected.
pub fn load_or_create(path: &Path, seed: &str, count: usize) -> anyhow::Result<Genesis> {
    let expected = generate_genesis(seed, count);
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let stored: Genesis = serde_json::from_str(&content)?;
        if stored != expected {
            anyhow::bail!(
                "genesis at {} ({}) does not match devnet settings ({})",
                path.display(),
                stored.genesis_hash,
                expected.genesis_hash
            );
        }
        return Ok(stored);
    }

    std::fs::write(path, serde_json::to_string_pretty(&expected)?)?;
    tracing::info!("Genesis saved to {:?}", path);
    Ok(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_deterministic() {
        let a = devnet_keys("seed", 3);
        let b = devnet_keys("seed", 3);
        let other = devnet_keys("other", 3);

        assert_eq!(
            a.iter().map(|k| k.id()).collect::<Vec<_>>(),
            b.iter().map(|k| k.id()).collect::<Vec<_>>()
        );
        assert_ne!(a[0].id(), a[1].id());
        assert_ne!(a[0].id(), other[0].id());
    }

    #[test]
    fn test_genesis_lists_validators() {
        let genesis = generate_genesis("seed", 4);

        assert_eq!(genesis.validators.len(), 4);
        assert_eq!(genesis.validators[2].id, devnet_key("seed", 2).id().to_hex());
        assert_eq!(genesis.timestamp, DEVNET_GENESIS_TIME);
        assert_ne!(genesis.genesis_hash, generate_genesis("seed", 3).genesis_hash);
    }

    #[test]
    fn test_load_or_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genesis.json");

        let created = load_or_create(&path, "seed", 3).unwrap();
        assert!(path.exists());
        assert_eq!(load_or_create(&path, "seed", 3).unwrap(), created);
        assert!(load_or_create(&path, "seed", 5).is_err());
    }
}
