//! # Anchorage Economics - Community Balances & Anchor Rewards
//!
//! Protocol-owned accounts and the anchor reward pool.
//!
//! ## Key Features
//!
//! - **Fixed-point amounts**: 8 decimal places, satoshi granularity
//! - **Community accounts**: `IncentiveFunding` and `AnchorReward`
//! - **Anchor reward pool**: per-block accrual, full-pool payouts, exact reversal
//!
//! ## Reward Flow
//!
//! ```text
//! ┌──────────────┐  accrue   ┌──────────────┐  settle   ┌──────────────┐
//! │ block connect│ ────────► │ AnchorReward │ ────────► │ reward addr  │
//! └──────────────┘           └──────────────┘           └──────────────┘
//! ```

pub mod amount;
pub mod community;
pub mod rewards;

// Re-exports
pub use amount::Amount;
pub use community::{CommunityAccountType, CommunityBalanceRegister, CommunityBalances};
pub use rewards::{AnchorRewardPool, AnchorRewardSchedule};

/// Token constants
pub mod constants {
    /// Satoshis per coin
    pub const COIN: i64 = 100_000_000;

    /// Anchor reward pool accrual per block: 0.1 coin
    pub const ANCHOR_REWARD_PER_BLOCK: i64 = COIN / 10;
}

pub use constants::*;

/// Economics errors
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EconomicsError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Negative amount: {0}")]
    NegativeAmount(Amount),

    #[error("Insufficient {account} balance: need {required}, have {available}")]
    InsufficientBalance {
        account: CommunityAccountType,
        required: Amount,
        available: Amount,
    },

    #[error("{0} balance overflow")]
    Overflow(CommunityAccountType),
}

impl From<EconomicsError> for anchorage_core::AnchorError {
    fn from(err: EconomicsError) -> Self {
        match err {
            EconomicsError::InsufficientBalance {
                required, available, ..
            } => anchorage_core::AnchorError::InsufficientPool {
                required: required.sat(),
                available: available.sat(),
            },
            other => anchorage_core::AnchorError::InvalidInput(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_block_reward() {
        assert_eq!(ANCHOR_REWARD_PER_BLOCK, 10_000_000);
        assert_eq!(Amount::from_sat(ANCHOR_REWARD_PER_BLOCK).to_string(), "0.10000000");
    }

    #[test]
    fn test_insufficient_balance_maps_to_pool_error() {
        let err: anchorage_core::AnchorError = EconomicsError::InsufficientBalance {
            account: CommunityAccountType::AnchorReward,
            required: Amount::from_sat(5),
            available: Amount::from_sat(3),
        }
        .into();

        assert_eq!(
            err,
            anchorage_core::AnchorError::InsufficientPool {
                required: 5,
                available: 3
            }
        );
    }
}
