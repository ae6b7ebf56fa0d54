//! # Anchorage Cryptography
//!
//! Cryptographic primitives for the anchor subsystem:
//! - Ed25519 validator keys for anchor auths and reward confirmations
//! - BLAKE3 hashing utilities, including domain-separated hashes
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Signatures | Ed25519 | 128-bit |
//! | Hashing | BLAKE3 | 256-bit |

pub mod error;
pub mod hash;
pub mod keys;

pub use error::*;
pub use hash::*;
pub use keys::*;

/// Cryptographic prelude
pub mod prelude {
    pub use crate::error::{CryptoError, Result};
    pub use crate::hash::{hash_blake3, hash_tagged};
    pub use crate::keys::{verify_signature, SecretKey, ValidatorKey};
}
