//! # Anchor Auths
//!
//! Members of the auth team sign the local block they propose to anchor.
//! Auths are grouped by (block height, block hash); conflicting hashes at one
//! height are tracked side by side and never merge.
//!
//! ```text
//! height 15 ─┬─ hash a1b2… : {v1, v2, v3}   ← quorum
//!            └─ hash ffee… : {v4}
//! ```

use crate::quorum::QuorumBook;
use crate::team::AnchorTeams;
use anchorage_core::{AnchorError, BlockHash, Result, ValidatorId};
use anchorage_crypto::{hash_tagged, verify_signature, ValidatorKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Signed vote for anchoring a local block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorAuth {
    pub signer: ValidatorId,
    pub public_key: [u8; 32],
    pub block_height: u64,
    pub block_hash: BlockHash,
    /// Local tip when the auth was signed; teams are checked at this height
    pub creation_height: u64,
    pub signature: Vec<u8>,
}

impl AnchorAuth {
    pub fn new_signed(
        key: &ValidatorKey,
        block_height: u64,
        block_hash: BlockHash,
        creation_height: u64,
    ) -> Self {
        let mut auth = Self {
            signer: key.id(),
            public_key: key.public_key(),
            block_height,
            block_hash,
            creation_height,
            signature: Vec::new(),
        };
        auth.signature = key.sign(&auth.signing_message());
        auth
    }

    pub fn signing_message(&self) -> [u8; 32] {
        hash_tagged(
            "anchorage/anchor-auth",
            &[
                &self.block_height.to_le_bytes(),
                self.block_hash.as_bytes(),
                &self.creation_height.to_le_bytes(),
            ],
        )
    }

    /// Check the key belongs to the signer and signed this auth
    pub fn verify(&self) -> Result<()> {
        if ValidatorId::from_public_key(&self.public_key) != self.signer {
            return Err(AnchorError::InvalidSignature);
        }
        verify_signature(&self.public_key, &self.signing_message(), &self.signature)?;
        Ok(())
    }
}

/// Outcome of an accepted or ignored submission
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    Accepted { signers: usize },
    Duplicate,
}

/// Block that reached auth quorum
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumResult {
    pub block_height: u64,
    pub block_hash: BlockHash,
    pub creation_height: u64,
    pub signers: usize,
}

/// Auth listing entry, one per (height, hash)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthGroup {
    pub block_height: u64,
    pub block_hash: BlockHash,
    pub creation_height: u64,
    pub signers: usize,
    pub signees: Vec<ValidatorId>,
}

/// Accumulates and deduplicates anchor auths
#[derive(Debug, Default)]
pub struct AuthLedger {
    book: QuorumBook<u64, BlockHash>,
    auths: BTreeMap<(u64, ValidatorId), AnchorAuth>,
    verify_signatures: bool,
}

impl AuthLedger {
    pub fn new(verify_signatures: bool) -> Self {
        Self {
            book: QuorumBook::new(),
            auths: BTreeMap::new(),
            verify_signatures,
        }
    }

    /// Validate and record an auth against the auth team at its creation height
    pub fn submit(&mut self, auth: AnchorAuth, auth_team: &AnchorTeams) -> Result<Submission> {
        if self.auths.contains_key(&(auth.block_height, auth.signer)) {
            debug!(
                "duplicate auth from {} at height {}",
                auth.signer, auth.block_height
            );
            return Ok(Submission::Duplicate);
        }
        if !auth_team.is_auth_member(&auth.signer) {
            warn!(
                "rejected auth from {}: not in auth team at height {}",
                auth.signer, auth.creation_height
            );
            return Err(AnchorError::IneligibleSigner {
                signer: auth.signer,
                height: auth.creation_height,
            });
        }
        if self.verify_signatures {
            auth.verify().map_err(|e| {
                warn!("rejected auth from {}: {}", auth.signer, e);
                e
            })?;
        }

        let signers = self
            .book
            .record(auth.block_height, auth.block_hash, auth.signer)
            .unwrap_or_else(|| self.book.signers(&auth.block_height, &auth.block_hash));
        self.auths.insert((auth.block_height, auth.signer), auth);
        Ok(Submission::Accepted { signers })
    }

    /// Block at `height` backed by at least `quorum` distinct signers
    pub fn quorum_reached_at(&self, height: u64, quorum: usize) -> Option<QuorumResult> {
        let leader = self.book.leader(&height, quorum)?;
        if leader.contenders > 1 {
            warn!(
                "{} conflicting blocks reached auth quorum at height {}",
                leader.contenders, height
            );
        }
        Some(QuorumResult {
            block_height: height,
            block_hash: leader.candidate,
            creation_height: self.creation_height(height, &leader.candidate),
            signers: leader.signers,
        })
    }

    /// Creation height of the first auth recorded for (height, hash)
    fn creation_height(&self, height: u64, hash: &BlockHash) -> u64 {
        self.auths
            .range((height, ValidatorId::new([0u8; 32]))..=(height, ValidatorId::new([0xff; 32])))
            .map(|(_, auth)| auth)
            .filter(|auth| auth.block_hash == *hash)
            .map(|auth| auth.creation_height)
            .min()
            .unwrap_or(height)
    }

    pub fn list(&self) -> Vec<AuthGroup> {
        self.book
            .iter()
            .map(|(height, hash, signers)| AuthGroup {
                block_height: *height,
                block_hash: *hash,
                creation_height: self.creation_height(*height, hash),
                signers: signers.len(),
                signees: signers.iter().copied().collect(),
            })
            .collect()
    }

    pub fn auths(&self) -> impl Iterator<Item = &AnchorAuth> {
        self.auths.values()
    }

    /// Drop auths for heights at or below `height`
    pub fn prune_through(&mut self, height: u64) {
        self.book.retain(|h| *h > height);
        self.auths.retain(|(h, _), _| *h > height);
    }

    pub fn len(&self) -> usize {
        self.auths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.auths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchorage_core::Hash256;

    fn keys(n: u8) -> Vec<ValidatorKey> {
        (1..=n).map(|i| ValidatorKey::from_seed([i; 32])).collect()
    }

    fn team(keys: &[ValidatorKey]) -> AnchorTeams {
        let ids: Vec<ValidatorId> = keys.iter().map(|k| k.id()).collect();
        AnchorTeams {
            height: 45,
            auth: ids.clone(),
            confirm: ids,
        }
    }

    fn block(n: u8) -> BlockHash {
        Hash256::new([n; 32])
    }

    #[test]
    fn test_quorum_after_distinct_signers() {
        let keys = keys(3);
        let team = team(&keys);
        let mut ledger = AuthLedger::new(true);

        for (i, key) in keys.iter().enumerate() {
            assert!(ledger.quorum_reached_at(15, 3).is_none());
            let outcome = ledger
                .submit(AnchorAuth::new_signed(key, 15, block(1), 45), &team)
                .unwrap();
            assert_eq!(outcome, Submission::Accepted { signers: i + 1 });
        }

        let result = ledger.quorum_reached_at(15, 3).unwrap();
        assert_eq!(result.block_hash, block(1));
        assert_eq!(result.signers, 3);
        assert_eq!(result.creation_height, 45);
    }

    #[test]
    fn test_duplicate_is_noop() {
        let keys = keys(3);
        let team = team(&keys);
        let mut ledger = AuthLedger::new(true);

        let auth = AnchorAuth::new_signed(&keys[0], 15, block(1), 45);
        ledger.submit(auth.clone(), &team).unwrap();

        assert_eq!(ledger.submit(auth, &team).unwrap(), Submission::Duplicate);
        // same signer, other hash at the same height
        let other = AnchorAuth::new_signed(&keys[0], 15, block(2), 45);
        assert_eq!(ledger.submit(other, &team).unwrap(), Submission::Duplicate);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_ineligible_signer_rejected() {
        let keys = keys(4);
        let team = team(&keys[..3]);
        let mut ledger = AuthLedger::new(true);

        let err = ledger
            .submit(AnchorAuth::new_signed(&keys[3], 15, block(1), 45), &team)
            .unwrap_err();
        assert!(matches!(err, AnchorError::IneligibleSigner { height: 45, .. }));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_bad_signature_rejected() {
        let keys = keys(3);
        let team = team(&keys);
        let mut ledger = AuthLedger::new(true);

        let mut auth = AnchorAuth::new_signed(&keys[0], 15, block(1), 45);
        auth.block_hash = block(9);

        assert_eq!(ledger.submit(auth, &team), Err(AnchorError::InvalidSignature));
    }

    #[test]
    fn test_signature_check_can_be_disabled() {
        let keys = keys(3);
        let team = team(&keys);
        let mut ledger = AuthLedger::new(false);

        let mut auth = AnchorAuth::new_signed(&keys[0], 15, block(1), 45);
        auth.signature.clear();

        assert!(ledger.submit(auth, &team).is_ok());
    }

    #[test]
    fn test_conflicting_hashes_do_not_merge() {
        let keys = keys(4);
        let team = team(&keys);
        let mut ledger = AuthLedger::new(true);

        ledger.submit(AnchorAuth::new_signed(&keys[0], 15, block(1), 45), &team).unwrap();
        ledger.submit(AnchorAuth::new_signed(&keys[1], 15, block(1), 45), &team).unwrap();
        ledger.submit(AnchorAuth::new_signed(&keys[2], 15, block(2), 45), &team).unwrap();
        ledger.submit(AnchorAuth::new_signed(&keys[3], 15, block(2), 45), &team).unwrap();

        assert!(ledger.quorum_reached_at(15, 3).is_none());
        assert_eq!(ledger.list().len(), 2);
        // tie at quorum 2 goes to the smaller hash
        assert_eq!(ledger.quorum_reached_at(15, 2).unwrap().block_hash, block(1));
    }

    #[test]
    fn test_prune_through() {
        let keys = keys(1);
        let team = team(&keys);
        let mut ledger = AuthLedger::new(true);
        ledger.submit(AnchorAuth::new_signed(&keys[0], 15, block(1), 45), &team).unwrap();
        ledger.submit(AnchorAuth::new_signed(&keys[0], 30, block(2), 60), &team).unwrap();

        ledger.prune_through(15);

        assert_eq!(ledger.len(), 1);
        assert!(ledger.quorum_reached_at(15, 1).is_none());
        assert!(ledger.quorum_reached_at(30, 1).is_some());
    }
}
