//! Error types for Anchorage anchor operations

use crate::types::{Hash256, ValidatorId};
use thiserror::Error;

/// Result type alias for anchor operations
pub type Result<T> = std::result::Result<T, AnchorError>;

/// Errors that can occur while driving the anchor lifecycle
///
/// Absence of quorum and duplicate submissions are not errors: the former is
/// reported as `None`, the latter as a no-op outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnchorError {
    // === Anchor Chain ===
    /// Append whose previous anchor does not match the chain head
    #[error("Anchor linkage violation: expected previous anchor {expected}, found {found}")]
    LinkageViolation { expected: Hash256, found: Hash256 },

    /// Pending anchor refers to a block at or below the chain head
    #[error("Stale anchor at height {defi_height}, chain head is at {head_height}")]
    StaleAnchor { defi_height: u64, head_height: u64 },

    // === Quorum Rounds ===
    /// Auth or reward confirmation from outside the computed team
    #[error("Signer {signer} is not a team member at height {height}")]
    IneligibleSigner { signer: ValidatorId, height: u64 },

    /// Signature does not verify against the declared key
    #[error("Invalid signature")]
    InvalidSignature,

    /// Reward confirmation for an anchor that is not the next unrewarded active anchor
    #[error("Anchor {0} is not rewardable")]
    NotRewardable(Hash256),

    // === Local Chain ===
    /// Referenced local block is unknown or has a different hash
    #[error("Unknown local block at height {0}")]
    UnknownBlock(u64),

    // === Reward Pool ===
    /// Payout larger than the accrued pool
    #[error("Insufficient anchor reward pool: need {required}, have {available}")]
    InsufficientPool { required: i64, available: i64 },

    // === External Chain ===
    /// Light-client bridge failed; the operation is retried at the next trigger
    #[error("External bridge unavailable: {0}")]
    ExternalBridgeUnavailable(String),

    /// Anchor transaction payload could not be decoded
    #[error("Invalid anchor payload: {0}")]
    InvalidPayload(String),

    // === Storage ===
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // === General ===
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AnchorError {
    /// Get the error code for RPC responses
    pub fn code(&self) -> u32 {
        match self {
            Self::LinkageViolation { .. } => 2001,
            Self::StaleAnchor { .. } => 2002,
            Self::IneligibleSigner { .. } => 2003,
            Self::InvalidSignature => 2004,
            Self::NotRewardable(_) => 2005,
            Self::UnknownBlock(_) => 2006,
            Self::InsufficientPool { .. } => 2007,
            Self::ExternalBridgeUnavailable(_) => 2008,
            Self::InvalidPayload(_) => 2009,
            _ => 9999,
        }
    }

    /// Check if the operation may succeed on a later trigger
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ExternalBridgeUnavailable(_) | Self::StaleAnchor { .. } | Self::UnknownBlock(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = AnchorError::LinkageViolation {
            expected: Hash256::ZERO,
            found: Hash256::new([1u8; 32]),
        };
        assert_eq!(err.code(), 2001);
        assert_eq!(AnchorError::InvalidSignature.code(), 2004);
        assert_eq!(AnchorError::Internal("x".into()).code(), 9999);
    }

    #[test]
    fn test_error_display() {
        let err = AnchorError::IneligibleSigner {
            signer: ValidatorId::new([3u8; 32]),
            height: 45,
        };

        let msg = format!("{}", err);
        assert!(msg.contains("not a team member"));
        assert!(msg.contains("45"));
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(AnchorError::ExternalBridgeUnavailable("timeout".into()).is_recoverable());
        assert!(!AnchorError::InvalidSignature.is_recoverable());
        assert!(!AnchorError::LinkageViolation {
            expected: Hash256::ZERO,
            found: Hash256::ZERO
        }
        .is_recoverable());
    }
}
