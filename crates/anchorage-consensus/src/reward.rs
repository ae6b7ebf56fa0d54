//! # Reward Confirmations
//!
//! Second quorum round. Once an anchor is active, members of the confirm
//! team sign a confirmation for it; at quorum a payout of the current
//! anchor reward pool to the anchor's reward address is handed to the block
//! builder.
//!
//! Only the oldest unrewarded active anchor is rewardable, so at most one
//! anchor has confirmations in flight.

use crate::anchor::Anchor;
use crate::auth::Submission;
use crate::quorum::QuorumBook;
use crate::team::AnchorTeams;
use anchorage_core::{AnchorError, BlockHash, Result, TxHash, ValidatorId};
use anchorage_crypto::{hash_tagged, verify_signature, ValidatorKey};
use anchorage_economics::Amount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Signed vote to pay out an active anchor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardConfirmation {
    pub confirmer: ValidatorId,
    pub public_key: [u8; 32],
    pub btc_tx_hash: TxHash,
    pub btc_block_height: u64,
    pub defi_block_height: u64,
    pub defi_block_hash: BlockHash,
    /// Local tip when signed; the confirm team is checked at this height
    pub creation_height: u64,
    pub signature: Vec<u8>,
}

impl RewardConfirmation {
    pub fn new_signed(key: &ValidatorKey, anchor: &Anchor, creation_height: u64) -> Self {
        let mut conf = Self {
            confirmer: key.id(),
            public_key: key.public_key(),
            btc_tx_hash: anchor.btc_tx_hash,
            btc_block_height: anchor.btc_block_height,
            defi_block_height: anchor.defi_block_height,
            defi_block_hash: anchor.defi_block_hash,
            creation_height,
            signature: Vec::new(),
        };
        conf.signature = key.sign(&conf.signing_message());
        conf
    }

    pub fn signing_message(&self) -> [u8; 32] {
        hash_tagged(
            "anchorage/reward-confirm",
            &[
                self.btc_tx_hash.as_bytes(),
                &self.btc_block_height.to_le_bytes(),
                &self.defi_block_height.to_le_bytes(),
                self.defi_block_hash.as_bytes(),
                &self.creation_height.to_le_bytes(),
            ],
        )
    }

    pub fn verify(&self) -> Result<()> {
        if ValidatorId::from_public_key(&self.public_key) != self.confirmer {
            return Err(AnchorError::InvalidSignature);
        }
        verify_signature(&self.public_key, &self.signing_message(), &self.signature)?;
        Ok(())
    }

    fn matches(&self, anchor: &Anchor) -> bool {
        self.btc_tx_hash == anchor.btc_tx_hash
            && self.btc_block_height == anchor.btc_block_height
            && self.defi_block_height == anchor.defi_block_height
            && self.defi_block_hash == anchor.defi_block_hash
    }
}

/// Payout handed to the block builder
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardPayout {
    /// Hash of the anchor being rewarded
    pub anchor_hash: TxHash,
    pub btc_block_height: u64,
    pub defi_block_height: u64,
    pub defi_block_hash: BlockHash,
    pub reward_address: String,
    pub amount: Amount,
}

impl RewardPayout {
    pub fn for_anchor(anchor: &Anchor, amount: Amount) -> Self {
        Self {
            anchor_hash: anchor.hash(),
            btc_block_height: anchor.btc_block_height,
            defi_block_height: anchor.defi_block_height,
            defi_block_hash: anchor.defi_block_hash,
            reward_address: anchor.reward_address.clone(),
            amount,
        }
    }
}

/// Reward confirmation listing entry, one per anchor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardConfirmGroup {
    pub btc_tx_hash: TxHash,
    pub btc_block_height: u64,
    pub defi_block_height: u64,
    pub defi_block_hash: BlockHash,
    pub signers: usize,
    pub signees: Vec<ValidatorId>,
}

/// Accumulates reward confirmations per anchored block
#[derive(Debug, Default)]
pub struct RewardLedger {
    book: QuorumBook<BlockHash, TxHash>,
    confirms: BTreeMap<(BlockHash, ValidatorId), RewardConfirmation>,
    verify_signatures: bool,
}

impl RewardLedger {
    pub fn new(verify_signatures: bool) -> Self {
        Self {
            book: QuorumBook::new(),
            confirms: BTreeMap::new(),
            verify_signatures,
        }
    }

    /// Validate and record a confirmation
    ///
    /// `rewardable` is the oldest unrewarded active anchor, if any.
    pub fn submit(
        &mut self,
        conf: RewardConfirmation,
        teams: &AnchorTeams,
        rewardable: Option<&Anchor>,
    ) -> Result<Submission> {
        if self
            .confirms
            .contains_key(&(conf.defi_block_hash, conf.confirmer))
        {
            debug!(
                "duplicate reward confirmation from {} for {}",
                conf.confirmer, conf.defi_block_hash
            );
            return Ok(Submission::Duplicate);
        }
        if !teams.is_confirm_member(&conf.confirmer) {
            warn!(
                "rejected reward confirmation from {}: not in confirm team at height {}",
                conf.confirmer, conf.creation_height
            );
            return Err(AnchorError::IneligibleSigner {
                signer: conf.confirmer,
                height: conf.creation_height,
            });
        }
        if !rewardable.map_or(false, |anchor| conf.matches(anchor)) {
            warn!(
                "rejected reward confirmation for {}: anchor is not rewardable",
                conf.btc_tx_hash
            );
            return Err(AnchorError::NotRewardable(conf.btc_tx_hash));
        }
        if self.verify_signatures {
            conf.verify().map_err(|e| {
                warn!("rejected reward confirmation from {}: {}", conf.confirmer, e);
                e
            })?;
        }

        let signers = self
            .book
            .record(conf.defi_block_hash, conf.btc_tx_hash, conf.confirmer)
            .unwrap_or_else(|| self.book.signers(&conf.defi_block_hash, &conf.btc_tx_hash));
        self.confirms
            .insert((conf.defi_block_hash, conf.confirmer), conf);
        Ok(Submission::Accepted { signers })
    }

    /// Signer count for the anchored block if it reached `quorum`
    pub fn quorum_for(&self, defi_block_hash: &BlockHash, quorum: usize) -> Option<usize> {
        self.book
            .leader(defi_block_hash, quorum)
            .map(|leader| leader.signers)
    }

    pub fn has_confirmed(&self, defi_block_hash: &BlockHash, confirmer: &ValidatorId) -> bool {
        self.confirms.contains_key(&(*defi_block_hash, *confirmer))
    }

    /// Drop every confirmation for a rewarded block
    pub fn discard(&mut self, defi_block_hash: &BlockHash) {
        self.book.remove(defi_block_hash);
        self.confirms.retain(|(hash, _), _| hash != defi_block_hash);
    }

    pub fn list(&self) -> Vec<RewardConfirmGroup> {
        self.book
            .iter()
            .filter_map(|(defi_hash, tx, signers)| {
                let sample = self
                    .confirms
                    .values()
                    .find(|c| c.defi_block_hash == *defi_hash && c.btc_tx_hash == *tx)?;
                Some(RewardConfirmGroup {
                    btc_tx_hash: *tx,
                    btc_block_height: sample.btc_block_height,
                    defi_block_height: sample.defi_block_height,
                    defi_block_hash: *defi_hash,
                    signers: signers.len(),
                    signees: signers.iter().copied().collect(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.confirms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.confirms.is_empty()
    }
}
