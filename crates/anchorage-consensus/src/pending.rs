//! Pending anchors
//!
//! Anchor transactions that were broadcast but are not yet part of the
//! anchor chain. Entries are keyed by external transaction hash, so the same
//! anchor broadcast twice is tracked once.

use crate::anchor::confirmations_at;
use crate::payload::AnchorPayload;
use anchorage_core::{BlockHash, TxHash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Anchor candidate awaiting its first external confirmation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAnchor {
    /// External block including the tx, `None` while unconfirmed
    pub btc_block_height: Option<u64>,
    pub btc_tx_hash: TxHash,
    pub defi_block_height: u64,
    pub defi_block_hash: BlockHash,
    pub reward_address: String,
    pub creation_height: u64,
    /// Quorum size embedded at creation
    pub signatures: u32,
}

impl PendingAnchor {
    pub fn from_payload(btc_tx_hash: TxHash, btc_block_height: Option<u64>, payload: AnchorPayload) -> Self {
        Self {
            btc_block_height,
            btc_tx_hash,
            defi_block_height: payload.defi_block_height,
            defi_block_hash: payload.defi_block_hash,
            reward_address: payload.reward_address,
            creation_height: payload.creation_height,
            signatures: payload.signatures as u32,
        }
    }

    pub fn confirmations(&self, external_height: u64) -> u64 {
        self.btc_block_height
            .map_or(0, |included| confirmations_at(included, external_height))
    }
}

/// Pending listing entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingView {
    pub btc_block_height: Option<u64>,
    pub btc_tx_hash: TxHash,
    pub defi_block_height: u64,
    pub defi_block_hash: BlockHash,
    pub reward_address: String,
    pub anchor_creation_height: u64,
    pub signatures: u32,
    pub confirmations: u64,
}

/// Pending anchor tracker
#[derive(Clone, Debug, Default)]
pub struct PendingTracker {
    entries: BTreeMap<TxHash, PendingAnchor>,
}

impl PendingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a broadcast anchor; returns false if the tx is already known
    pub fn observe(&mut self, pending: PendingAnchor) -> bool {
        if self.entries.contains_key(&pending.btc_tx_hash) {
            return false;
        }
        debug!(
            "pending anchor {} for height {}",
            pending.btc_tx_hash, pending.defi_block_height
        );
        self.entries.insert(pending.btc_tx_hash, pending);
        true
    }

    pub fn get(&self, tx: &TxHash) -> Option<&PendingAnchor> {
        self.entries.get(tx)
    }

    pub fn contains(&self, tx: &TxHash) -> bool {
        self.entries.contains_key(tx)
    }

    pub fn tx_hashes(&self) -> Vec<TxHash> {
        self.entries.keys().copied().collect()
    }

    /// Update the external inclusion height as re-reported by the bridge
    pub fn set_inclusion(&mut self, tx: &TxHash, height: Option<u64>) {
        if let Some(entry) = self.entries.get_mut(tx) {
            if entry.btc_block_height != height {
                debug!(
                    "pending anchor {} inclusion {:?} -> {:?}",
                    tx, entry.btc_block_height, height
                );
                entry.btc_block_height = height;
            }
        }
    }

    /// Entries with at least one confirmation, by (external height, local height)
    pub fn confirmed(&self, external_height: u64) -> Vec<PendingAnchor> {
        let mut confirmed: Vec<PendingAnchor> = self
            .entries
            .values()
            .filter(|p| p.confirmations(external_height) >= 1)
            .cloned()
            .collect();
        confirmed.sort_by_key(|p| (p.btc_block_height, p.defi_block_height, p.btc_tx_hash));
        confirmed
    }

    pub fn remove(&mut self, tx: &TxHash) -> Option<PendingAnchor> {
        self.entries.remove(tx)
    }

    /// Drop entries superseded by the anchor chain head
    ///
    /// An entry that was never included stays until the head passes it.
    pub fn prune(&mut self, head_defi_height: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, p| p.defi_block_height > head_defi_height);
        let pruned = before - self.entries.len();
        if pruned > 0 {
            debug!("pruned {} pending anchors", pruned);
        }
        pruned
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingAnchor> {
        self.entries.values()
    }

    pub fn view(&self, external_height: u64) -> Vec<PendingView> {
        self.entries
            .values()
            .map(|p| PendingView {
                btc_block_height: p.btc_block_height,
                btc_tx_hash: p.btc_tx_hash,
                defi_block_height: p.defi_block_height,
                defi_block_hash: p.defi_block_hash,
                reward_address: p.reward_address.clone(),
                anchor_creation_height: p.creation_height,
                signatures: p.signatures,
                confirmations: p.confirmations(external_height),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchorage_core::Hash256;

    fn pending(tx: u8, defi_height: u64, btc_height: Option<u64>) -> PendingAnchor {
        PendingAnchor {
            btc_block_height: btc_height,
            btc_tx_hash: Hash256::new([tx; 32]),
            defi_block_height: defi_height,
            defi_block_hash: Hash256::new([tx + 100; 32]),
            reward_address: "mwsZw8nF7pKxWH8eoKL9tPxTpaFkz7QeLU".to_string(),
            creation_height: defi_height + 30,
            signatures: 3,
        }
    }

    #[test]
    fn test_observe_is_idempotent() {
        let mut tracker = PendingTracker::new();
        assert!(tracker.observe(pending(1, 15, Some(15))));
        assert!(!tracker.observe(pending(1, 15, Some(15))));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_confirmations() {
        let p = pending(1, 15, Some(15));
        assert_eq!(p.confirmations(15), 1);
        assert_eq!(p.confirmations(19), 5);
        assert_eq!(pending(2, 15, None).confirmations(100), 0);
    }

    #[test]
    fn test_inclusion_can_regress() {
        let mut tracker = PendingTracker::new();
        let tx = Hash256::new([1; 32]);
        tracker.observe(pending(1, 15, Some(15)));

        tracker.set_inclusion(&tx, None);
        assert!(tracker.confirmed(20).is_empty());

        tracker.set_inclusion(&tx, Some(18));
        assert_eq!(tracker.confirmed(18).len(), 1);
    }

    #[test]
    fn test_confirmed_ordering() {
        let mut tracker = PendingTracker::new();
        tracker.observe(pending(1, 30, Some(16)));
        tracker.observe(pending(2, 45, Some(15)));
        tracker.observe(pending(3, 15, Some(15)));
        tracker.observe(pending(4, 60, None));

        let order: Vec<u64> = tracker
            .confirmed(20)
            .iter()
            .map(|p| p.defi_block_height)
            .collect();
        assert_eq!(order, vec![15, 45, 30]);
    }

    #[test]
    fn test_prune() {
        let mut tracker = PendingTracker::new();
        tracker.observe(pending(1, 15, Some(15)));
        tracker.observe(pending(2, 30, None));
        tracker.observe(pending(3, 45, None));

        // head at 15 supersedes the first only
        assert_eq!(tracker.prune(15), 1);
        // never included, still kept however old
        assert_eq!(tracker.prune(29), 0);
        assert_eq!(tracker.len(), 2);

        assert_eq!(tracker.prune(45), 2);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_view_fields() {
        let mut tracker = PendingTracker::new();
        tracker.observe(pending(1, 15, Some(15)));

        let view = &tracker.view(15)[0];
        assert_eq!(view.confirmations, 1);
        assert_eq!(view.signatures, 3);

        let json = serde_json::to_value(view).unwrap();
        assert_eq!(json["btcBlockHeight"], 15);
        assert_eq!(json["defiBlockHeight"], 15);
    }
}
