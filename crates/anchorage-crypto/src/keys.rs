//! Validator key management for Anchorage
//!
//! Masternode operators sign anchor auths and reward confirmations with
//! Ed25519. A validator's identity is the BLAKE3 hash of its public key.

use crate::error::{CryptoError, Result};
use anchorage_core::ValidatorId;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Ed25519 signature length in bytes
pub const SIGNATURE_LENGTH: usize = 64;

/// Ed25519 secret key bytes (zeroized on drop)
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; 32],
}

impl SecretKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let mut decoded =
            hex::decode(s).map_err(|e| CryptoError::InvalidSecretKey(e.to_string()))?;
        let bytes: [u8; 32] = decoded.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidSecretKey(format!("expected 32 bytes, got {}", decoded.len()))
        })?;
        decoded.zeroize();
        Ok(Self { bytes })
    }
}

/// Signing key of one masternode operator
pub struct ValidatorKey {
    signing_key: SigningKey,
    public_key: [u8; 32],
    id: ValidatorId,
}

impl ValidatorKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut secret_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut secret_bytes);
        let key = Self::from_secret(&SecretKey::new(secret_bytes));
        secret_bytes.zeroize();
        key
    }

    /// Deterministic key from a 32-byte seed (devnet and tests)
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_secret(&SecretKey::new(seed))
    }

    pub fn from_secret(secret: &SecretKey) -> Self {
        let signing_key = SigningKey::from_bytes(secret.as_bytes());
        let public_key = signing_key.verifying_key().to_bytes();
        Self {
            signing_key,
            public_key,
            id: ValidatorId::from_public_key(&public_key),
        }
    }

    pub fn secret(&self) -> SecretKey {
        SecretKey::new(self.signing_key.to_bytes())
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public_key
    }

    pub fn id(&self) -> ValidatorId {
        self.id
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }
}

impl std::fmt::Debug for ValidatorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorKey").field("id", &self.id).finish()
    }
}

/// Verify an Ed25519 signature against a raw public key
pub fn verify_signature(public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> Result<()> {
    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    let sig_bytes: [u8; SIGNATURE_LENGTH] = signature.try_into().map_err(|_| {
        CryptoError::InvalidSignature(format!(
            "expected {} bytes, got {}",
            SIGNATURE_LENGTH,
            signature.len()
        ))
    })?;
    let sig = Signature::from_bytes(&sig_bytes);
    verifying_key
        .verify(message, &sig)
        .map_err(|_| CryptoError::VerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = ValidatorKey::generate();
        let sig = key.sign(b"anchor auth");

        assert_eq!(sig.len(), SIGNATURE_LENGTH);
        assert!(verify_signature(&key.public_key(), b"anchor auth", &sig).is_ok());
    }

    #[test]
    fn test_verify_rejects_other_message() {
        let key = ValidatorKey::generate();
        let sig = key.sign(b"anchor auth");

        assert_eq!(
            verify_signature(&key.public_key(), b"reward confirm", &sig),
            Err(CryptoError::VerificationFailed)
        );
    }

    #[test]
    fn test_verify_rejects_truncated_signature() {
        let key = ValidatorKey::generate();
        let sig = key.sign(b"msg");

        assert!(matches!(
            verify_signature(&key.public_key(), b"msg", &sig[..10]),
            Err(CryptoError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_from_seed_is_deterministic() {
        let a = ValidatorKey::from_seed([5u8; 32]);
        let b = ValidatorKey::from_seed([5u8; 32]);

        assert_eq!(a.id(), b.id());
        assert_eq!(a.id(), ValidatorId::from_public_key(&a.public_key()));
    }

    #[test]
    fn test_secret_hex_roundtrip() {
        let key = ValidatorKey::generate();
        let restored = SecretKey::from_hex(&key.secret().to_hex()).unwrap();

        assert_eq!(ValidatorKey::from_secret(&restored).id(), key.id());
        assert!(SecretKey::from_hex("abcd").is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn signature_binds_message(msg in prop::collection::vec(any::<u8>(), 0..256)) {
                let key = ValidatorKey::from_seed([11u8; 32]);
                let sig = key.sign(&msg);
                prop_assert!(verify_signature(&key.public_key(), &msg, &sig).is_ok());

                let mut tampered = msg.clone();
                tampered.push(0);
                prop_assert!(verify_signature(&key.public_key(), &tampered, &sig).is_err());
            }
        }
    }
}
