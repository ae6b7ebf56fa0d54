//! Quorum bookkeeping
//!
//! A `QuorumBook` groups votes into rounds (`K`) and, within a round, into
//! competing candidates (`C`). Each validator counts at most once per round,
//! whichever candidate it backed first. Quorum is a pure predicate over the
//! number of distinct signers.

use anchorage_core::ValidatorId;
use std::collections::{BTreeMap, BTreeSet};

/// Candidate leading a round
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumLeader<C> {
    pub candidate: C,
    pub signers: usize,
    /// Candidates in the round that reached quorum (more than one is a fault)
    pub contenders: usize,
}

/// Distinct-signer sets per round and candidate
#[derive(Clone, Debug)]
pub struct QuorumBook<K, C> {
    rounds: BTreeMap<K, BTreeMap<C, BTreeSet<ValidatorId>>>,
}

impl<K: Ord, C: Ord> Default for QuorumBook<K, C> {
    fn default() -> Self {
        Self {
            rounds: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone, C: Ord + Clone> QuorumBook<K, C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `signer` already voted in round `key`
    pub fn has_voted(&self, key: &K, signer: &ValidatorId) -> bool {
        self.rounds
            .get(key)
            .map_or(false, |candidates| candidates.values().any(|s| s.contains(signer)))
    }

    /// Record a vote, returning the candidate's signer count, or `None` for a duplicate
    pub fn record(&mut self, key: K, candidate: C, signer: ValidatorId) -> Option<usize> {
        if self.has_voted(&key, &signer) {
            return None;
        }
        let signers = self
            .rounds
            .entry(key)
            .or_default()
            .entry(candidate)
            .or_default();
        signers.insert(signer);
        Some(signers.len())
    }

    pub fn signers(&self, key: &K, candidate: &C) -> usize {
        self.rounds
            .get(key)
            .and_then(|candidates| candidates.get(candidate))
            .map_or(0, BTreeSet::len)
    }

    pub fn signees(&self, key: &K, candidate: &C) -> Vec<ValidatorId> {
        self.rounds
            .get(key)
            .and_then(|candidates| candidates.get(candidate))
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Candidate with the most signers, if it reaches `quorum`
    ///
    /// Exact ties go to the smaller candidate.
    pub fn leader(&self, key: &K, quorum: usize) -> Option<QuorumLeader<C>> {
        let candidates = self.rounds.get(key)?;

        let mut best: Option<(&C, usize)> = None;
        let mut contenders = 0;
        for (candidate, signers) in candidates {
            if signers.len() >= quorum {
                contenders += 1;
            }
            if best.map_or(true, |(_, n)| signers.len() > n) {
                best = Some((candidate, signers.len()));
            }
        }

        best.filter(|(_, signers)| *signers >= quorum && *signers > 0)
            .map(|(candidate, signers)| QuorumLeader {
                candidate: candidate.clone(),
                signers,
                contenders,
            })
    }

    /// Iterate `(round, candidate, signers)` in key order
    pub fn iter(&self) -> impl Iterator<Item = (&K, &C, &BTreeSet<ValidatorId>)> {
        self.rounds.iter().flat_map(|(key, candidates)| {
            candidates
                .iter()
                .map(move |(candidate, signers)| (key, candidate, signers))
        })
    }

    pub fn remove(&mut self, key: &K) {
        self.rounds.remove(key);
    }

    /// Keep only rounds for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.rounds.retain(|key, _| keep(key));
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}
