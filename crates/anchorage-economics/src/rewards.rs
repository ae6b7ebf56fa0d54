//! # Anchor Reward Pool
//!
//! Every connected block credits a fixed subsidy to the `AnchorReward`
//! community account. A reward payout drains the whole pool; the payout
//! block's own accrual is credited afterwards, so the pool restarts at one
//! block's worth.
//!
//! ```text
//! height 1..=60   accrue 0.1 each          pool = 6.0
//! height 61       accrue 0.1               pool = 6.1  → payout quorum
//! height 62       settle 6.1, accrue 0.1   pool = 0.1
//! ```

use crate::amount::Amount;
use crate::community::{CommunityAccountType, CommunityBalances};
use crate::EconomicsError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-block subsidies credited to community accounts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRewardSchedule {
    /// Credited to `AnchorReward` for every connected block
    pub anchor_per_block: Amount,

    /// Credited to `IncentiveFunding` for every connected block
    pub incentive_per_block: Amount,
}

impl Default for AnchorRewardSchedule {
    fn default() -> Self {
        Self {
            anchor_per_block: Amount::from_sat(crate::constants::ANCHOR_REWARD_PER_BLOCK),
            incentive_per_block: Amount::ZERO,
        }
    }
}

impl AnchorRewardSchedule {
    fn credits(&self) -> [(CommunityAccountType, Amount); 2] {
        [
            (CommunityAccountType::AnchorReward, self.anchor_per_block),
            (CommunityAccountType::IncentiveFunding, self.incentive_per_block),
        ]
    }
}

/// Accrual and settlement of the anchor reward pool
pub struct AnchorRewardPool {
    balances: Arc<dyn CommunityBalances>,
    schedule: AnchorRewardSchedule,
}

impl AnchorRewardPool {
    pub fn new(balances: Arc<dyn CommunityBalances>, schedule: AnchorRewardSchedule) -> Self {
        Self { balances, schedule }
    }

    pub fn schedule(&self) -> &AnchorRewardSchedule {
        &self.schedule
    }

    pub fn balances(&self) -> &Arc<dyn CommunityBalances> {
        &self.balances
    }

    /// Current pool, the amount a payout built now would carry
    pub fn current(&self) -> Amount {
        self.balances.balance(CommunityAccountType::AnchorReward)
    }

    /// Credit one block's subsidies
    pub fn accrue(&self, height: u64) -> Result<Amount, EconomicsError> {
        for (kind, amount) in self.schedule.credits() {
            if amount > Amount::ZERO {
                self.balances.add(kind, amount)?;
            }
        }
        let pool = self.current();
        log::debug!("height {}: anchor reward pool {}", height, pool);
        Ok(pool)
    }

    /// Reverse one block's subsidies (block disconnected)
    ///
    /// Checks every account before debiting any of them.
    pub fn unaccrue(&self, height: u64) -> Result<Amount, EconomicsError> {
        for (kind, amount) in self.schedule.credits() {
            let available = self.balances.balance(kind);
            if available < amount {
                return Err(EconomicsError::InsufficientBalance {
                    account: kind,
                    required: amount,
                    available,
                });
            }
        }
        for (kind, amount) in self.schedule.credits() {
            if amount > Amount::ZERO {
                self.balances.sub(kind, amount)?;
            }
        }
        let pool = self.current();
        log::debug!("height {} disconnected: anchor reward pool {}", height, pool);
        Ok(pool)
    }

    /// Debit a mined payout
    pub fn settle(&self, amount: Amount) -> Result<Amount, EconomicsError> {
        let remaining = self.balances.sub(CommunityAccountType::AnchorReward, amount)?;
        log::info!("anchor reward of {} settled, pool now {}", amount, remaining);
        Ok(remaining)
    }

    /// Credit back a payout whose block was disconnected
    pub fn refund(&self, amount: Amount) -> Result<Amount, EconomicsError> {
        let restored = self.balances.add(CommunityAccountType::AnchorReward, amount)?;
        log::info!("anchor reward of {} refunded, pool now {}", amount, restored);
        Ok(restored)
    }
}
