//! # Team Selection
//!
//! Two teams are drawn from masternodes that minted recently:
//!
//! - **auth team** signs anchor auths for a recent local block
//! - **confirm team** signs reward confirmations for active anchors
//!
//! Both orderings are seeded by the block hash at the last rotation height,
//! so every node computes the same teams from the same chain.

use crate::interfaces::ChainReader;
use anchorage_core::{AnchorError, BlockHash, Result, ValidatorId};
use anchorage_crypto::hash_tagged;
use serde::{Deserialize, Serialize};
use tracing::debug;

const AUTH_TEAM_TAG: &str = "anchor-auth";
const CONFIRM_TEAM_TAG: &str = "anchor-confirm";

/// Teams valid at a local height
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorTeams {
    pub height: u64,
    pub auth: Vec<ValidatorId>,
    pub confirm: Vec<ValidatorId>,
}

impl AnchorTeams {
    pub fn is_auth_member(&self, id: &ValidatorId) -> bool {
        self.auth.contains(id)
    }

    pub fn is_confirm_member(&self, id: &ValidatorId) -> bool {
        self.confirm.contains(id)
    }
}

/// Deterministic team selector
#[derive(Clone, Debug)]
pub struct TeamSelector {
    pub team_size: usize,
    pub lookback_secs: i64,
    pub change_period: u64,
}

impl TeamSelector {
    pub fn new(team_size: usize, lookback_secs: i64, change_period: u64) -> Self {
        Self {
            team_size,
            lookback_secs,
            change_period: change_period.max(1),
        }
    }

    /// Height whose block hash seeds the teams at `height`
    pub fn rotation_height(&self, height: u64) -> u64 {
        height - height % self.change_period
    }

    pub fn teams_at(&self, chain: &dyn ChainReader, height: u64) -> Result<AnchorTeams> {
        let rotation = self.rotation_height(height);
        let seed = chain
            .block_hash_at(rotation)
            .ok_or(AnchorError::UnknownBlock(rotation))?;

        let mut eligible = chain.validators_minted_since(height, self.lookback_secs);
        eligible.sort();
        eligible.dedup();

        if eligible.len() < self.team_size {
            debug!(
                "only {} eligible masternodes at height {}, team size {}",
                eligible.len(),
                height,
                self.team_size
            );
        }

        Ok(AnchorTeams {
            height,
            auth: self.ordered(AUTH_TEAM_TAG, &seed, &eligible),
            confirm: self.ordered(CONFIRM_TEAM_TAG, &seed, &eligible),
        })
    }

    fn ordered(&self, tag: &str, seed: &BlockHash, eligible: &[ValidatorId]) -> Vec<ValidatorId> {
        let mut scored: Vec<([u8; 32], ValidatorId)> = eligible
            .iter()
            .map(|id| (hash_tagged(tag, &[seed.as_bytes(), id.as_bytes()]), *id))
            .collect();
        scored.sort();
        scored
            .into_iter()
            .take(self.team_size)
            .map(|(_, id)| id)
            .collect()
    }
}
