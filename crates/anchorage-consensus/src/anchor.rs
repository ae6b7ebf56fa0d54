//! # Anchor Chain
//!
//! Append-only sequence of anchors, each linked to its predecessor by hash.
//! An anchor's hash is the hash of the external transaction that carried it.
//!
//! ```text
//! ZERO ◄── anchor(15) ◄── anchor(30) ◄── anchor(45)   (head)
//! ```
//!
//! Confirmations and activity are derived from the external height on
//! demand; only the reward record may change after an anchor is appended.

use anchorage_core::{AnchorError, BlockHash, Hash256, Result, TxHash};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// An anchor confirmed on the external chain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub btc_block_height: u64,
    pub btc_block_hash: BlockHash,
    pub btc_tx_hash: TxHash,
    pub previous_anchor: Hash256,
    pub defi_block_height: u64,
    pub defi_block_hash: BlockHash,
    pub reward_address: String,
    #[serde(rename = "anchorCreationHeight")]
    pub creation_height: u64,
    pub signatures: u32,
    pub dfi_reward_hash: Option<TxHash>,
}

impl Anchor {
    pub fn hash(&self) -> Hash256 {
        self.btc_tx_hash
    }

    /// External confirmations at `external_height`, 0 below the anchor
    pub fn confirmations(&self, external_height: u64) -> u64 {
        confirmations_at(self.btc_block_height, external_height)
    }

    pub fn is_active(&self, external_height: u64, threshold: u64) -> bool {
        self.confirmations(external_height) >= threshold
    }

    pub fn is_rewarded(&self) -> bool {
        self.dfi_reward_hash.is_some()
    }
}

/// `external_height - included_at + 1`, or 0 when the external tip is below the inclusion height
pub fn confirmations_at(included_at: u64, external_height: u64) -> u64 {
    if external_height < included_at {
        0
    } else {
        external_height - included_at + 1
    }
}

/// Result of a successful append
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    AlreadyHead,
}

/// Anchor listing entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorView {
    #[serde(flatten)]
    pub anchor: Anchor,
    pub confirmations: u64,
    pub active: bool,
}

/// Active anchor still waiting for its reward
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnrewardedView {
    pub btc_height: u64,
    pub btc_hash: TxHash,
    pub dfi_height: u64,
    pub dfi_hash: BlockHash,
}

/// Rewarded anchor history entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardedView {
    pub anchor_height: u64,
    pub anchor_hash: BlockHash,
    pub reward_address: String,
    pub dfi_reward_hash: TxHash,
    pub btc_anchor_height: u64,
    pub btc_anchor_hash: TxHash,
}

/// Anchor chain store
#[derive(Clone, Debug, Default)]
pub struct AnchorChain {
    anchors: Vec<Anchor>,
}

impl AnchorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<&Anchor> {
        self.anchors.last()
    }

    /// Hash the next anchor must link to
    pub fn head_hash(&self) -> Hash256 {
        self.head().map_or(Hash256::ZERO, Anchor::hash)
    }

    /// Local height of the newest anchored block, 0 when empty
    pub fn head_defi_height(&self) -> u64 {
        self.head().map_or(0, |a| a.defi_block_height)
    }

    pub fn append(&mut self, anchor: Anchor) -> Result<AppendOutcome> {
        if self.head() == Some(&anchor) {
            return Ok(AppendOutcome::AlreadyHead);
        }
        let expected = self.head_hash();
        if anchor.previous_anchor != expected {
            warn!(
                "anchor {} links to {}, head is {}",
                anchor.hash(),
                anchor.previous_anchor,
                expected
            );
            return Err(AnchorError::LinkageViolation {
                expected,
                found: anchor.previous_anchor,
            });
        }
        self.anchors.push(anchor);
        Ok(AppendOutcome::Appended)
    }

    pub fn get(&self, hash: &Hash256) -> Option<&Anchor> {
        self.anchors.iter().find(|a| a.hash() == *hash)
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.get(hash).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors.iter()
    }

    pub fn active_anchors(&self, external_height: u64, threshold: u64) -> Vec<&Anchor> {
        self.anchors
            .iter()
            .filter(|a| a.is_active(external_height, threshold))
            .collect()
    }

    pub fn unrewarded(&self, external_height: u64, threshold: u64) -> Vec<&Anchor> {
        self.anchors
            .iter()
            .filter(|a| a.is_active(external_height, threshold) && !a.is_rewarded())
            .collect()
    }

    /// The only anchor reward confirmations may currently target
    pub fn oldest_unrewarded(&self, external_height: u64, threshold: u64) -> Option<&Anchor> {
        self.anchors
            .iter()
            .find(|a| a.is_active(external_height, threshold) && !a.is_rewarded())
    }

    pub fn rewarded(&self) -> Vec<&Anchor> {
        self.anchors.iter().filter(|a| a.is_rewarded()).collect()
    }

    /// Record a mined payout on an unrewarded anchor
    pub fn set_reward(&mut self, hash: &Hash256, txid: TxHash) -> Result<()> {
        let anchor = self
            .anchors
            .iter_mut()
            .find(|a| a.hash() == *hash)
            .ok_or(AnchorError::NotRewardable(*hash))?;
        if anchor.is_rewarded() {
            return Err(AnchorError::NotRewardable(*hash));
        }
        anchor.dfi_reward_hash = Some(txid);
        Ok(())
    }

    /// Remove the payout record if it was made by `txid`
    pub fn clear_reward(&mut self, hash: &Hash256, txid: &TxHash) -> bool {
        match self.anchors.iter_mut().find(|a| a.hash() == *hash) {
            Some(anchor) if anchor.dfi_reward_hash.as_ref() == Some(txid) => {
                anchor.dfi_reward_hash = None;
                true
            }
            _ => false,
        }
    }

    pub fn view(&self, external_height: u64, threshold: u64) -> Vec<AnchorView> {
        self.anchors
            .iter()
            .map(|a| AnchorView {
                anchor: a.clone(),
                confirmations: a.confirmations(external_height),
                active: a.is_active(external_height, threshold),
            })
            .collect()
    }

    pub fn unrewarded_view(&self, external_height: u64, threshold: u64) -> Vec<UnrewardedView> {
        self.unrewarded(external_height, threshold)
            .into_iter()
            .map(|a| UnrewardedView {
                btc_height: a.btc_block_height,
                btc_hash: a.btc_tx_hash,
                dfi_height: a.defi_block_height,
                dfi_hash: a.defi_block_hash,
            })
            .collect()
    }

    pub fn rewarded_view(&self) -> Vec<RewardedView> {
        self.anchors
            .iter()
            .filter_map(|a| {
                a.dfi_reward_hash.map(|reward| RewardedView {
                    anchor_height: a.defi_block_height,
                    anchor_hash: a.defi_block_hash,
                    reward_address: a.reward_address.clone(),
                    dfi_reward_hash: reward,
                    btc_anchor_height: a.btc_block_height,
                    btc_anchor_hash: a.btc_tx_hash,
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}
