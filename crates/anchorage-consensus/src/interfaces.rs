//! Collaborator seams
//!
//! The anchor subsystem reads the local chain and hands reward payouts to
//! the block builder. Both are owned by the host node.

use crate::reward::RewardPayout;
use anchorage_core::{BlockHash, TxHash, ValidatorId};
use serde::{Deserialize, Serialize};

/// Read access to local chain state
#[cfg_attr(test, mockall::automock)]
pub trait ChainReader: Send + Sync {
    /// Height of the local tip
    fn current_height(&self) -> u64;

    fn block_hash_at(&self, height: u64) -> Option<BlockHash>;

    /// Block time (unix seconds) at a height
    fn block_time_at(&self, height: u64) -> Option<i64>;

    /// Validators that minted a block within `window_secs` of chain time before `height`
    fn validators_minted_since(&self, height: u64, window_secs: i64) -> Vec<ValidatorId>;
}

/// Block production seam for reward payouts
pub trait BlockBuilder: Send + Sync {
    /// Include `payout` as a transaction in an upcoming block
    fn queue_reward_payout(&self, payout: RewardPayout);
}

/// A reward payout included in a connected block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinedPayout {
    pub txid: TxHash,
    pub payout: RewardPayout,
}

/// A local block as seen by the anchor subsystem
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedBlock {
    pub height: u64,
    pub hash: BlockHash,
    pub time: i64,
    pub payouts: Vec<MinedPayout>,
}
