//! Cryptographic error types

use thiserror::Error;

/// Result type for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors in cryptographic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Invalid public key
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Invalid secret key
    #[error("Invalid secret key: {0}")]
    InvalidSecretKey(String),

    /// Malformed signature bytes
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Signature verification failed
    #[error("Signature verification failed")]
    VerificationFailed,
}

impl From<CryptoError> for anchorage_core::AnchorError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::VerificationFailed | CryptoError::InvalidSignature(_) => {
                anchorage_core::AnchorError::InvalidSignature
            }
            other => anchorage_core::AnchorError::InvalidInput(other.to_string()),
        }
    }
}
