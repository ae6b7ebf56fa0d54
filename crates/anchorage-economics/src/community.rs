//! # Community Balance Register
//!
//! Protocol-owned balances that are funded from block subsidies rather than
//! held by any address.
//!
//! | Account | Code | Funded by | Spent by |
//! |---------|------|-----------|----------|
//! | IncentiveFunding | `I` | per-block subsidy | incentive programs |
//! | AnchorReward | `A` | per-block subsidy | anchor reward payouts |

use crate::amount::Amount;
use crate::EconomicsError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Community account kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CommunityAccountType {
    IncentiveFunding,
    AnchorReward,
}

impl CommunityAccountType {
    pub const ALL: [CommunityAccountType; 2] = [Self::IncentiveFunding, Self::AnchorReward];

    /// Single-byte storage code
    pub fn code(&self) -> u8 {
        match self {
            Self::IncentiveFunding => b'I',
            Self::AnchorReward => b'A',
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'I' => Some(Self::IncentiveFunding),
            b'A' => Some(Self::AnchorReward),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::IncentiveFunding => "IncentiveFunding",
            Self::AnchorReward => "AnchorReward",
        }
    }
}

impl fmt::Display for CommunityAccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Access to community balances
///
/// Balances never go negative; every mutation checks before it writes.
pub trait CommunityBalances: Send + Sync {
    fn balance(&self, kind: CommunityAccountType) -> Amount;

    fn set(&self, kind: CommunityAccountType, amount: Amount) -> Result<(), EconomicsError>;

    fn add(&self, kind: CommunityAccountType, amount: Amount) -> Result<Amount, EconomicsError>;

    fn sub(&self, kind: CommunityAccountType, amount: Amount) -> Result<Amount, EconomicsError>;

    /// Visit stored balances in account order; the visitor returns `false` to stop
    fn for_each(&self, visitor: &mut dyn FnMut(CommunityAccountType, Amount) -> bool);
}

/// In-memory community balance register
#[derive(Default)]
pub struct CommunityBalanceRegister {
    balances: RwLock<BTreeMap<CommunityAccountType, Amount>>,
}

impl CommunityBalanceRegister {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommunityBalances for CommunityBalanceRegister {
    fn balance(&self, kind: CommunityAccountType) -> Amount {
        self.balances.read().get(&kind).copied().unwrap_or_default()
    }

    fn set(&self, kind: CommunityAccountType, amount: Amount) -> Result<(), EconomicsError> {
        if amount.is_negative() {
            return Err(EconomicsError::NegativeAmount(amount));
        }
        self.balances.write().insert(kind, amount);
        Ok(())
    }

    fn add(&self, kind: CommunityAccountType, amount: Amount) -> Result<Amount, EconomicsError> {
        if amount.is_negative() {
            return Err(EconomicsError::NegativeAmount(amount));
        }
        let mut balances = self.balances.write();
        let current = balances.get(&kind).copied().unwrap_or_default();
        let updated = current
            .checked_add(amount)
            .ok_or(EconomicsError::Overflow(kind))?;
        balances.insert(kind, updated);
        log::trace!("community {} +{} = {}", kind, amount, updated);
        Ok(updated)
    }

    fn sub(&self, kind: CommunityAccountType, amount: Amount) -> Result<Amount, EconomicsError> {
        if amount.is_negative() {
            return Err(EconomicsError::NegativeAmount(amount));
        }
        let mut balances = self.balances.write();
        let current = balances.get(&kind).copied().unwrap_or_default();
        if current < amount {
            return Err(EconomicsError::InsufficientBalance {
                account: kind,
                required: amount,
                available: current,
            });
        }
        let updated = Amount::from_sat(current.sat() - amount.sat());
        balances.insert(kind, updated);
        log::trace!("community {} -{} = {}", kind, amount, updated);
        Ok(updated)
    }

    fn for_each(&self, visitor: &mut dyn FnMut(CommunityAccountType, Amount) -> bool) {
        let balances = self.balances.read();
        for (kind, amount) in balances.iter() {
            if !visitor(*kind, *amount) {
                break;
            }
        }
    }
}
