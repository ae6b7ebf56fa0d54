//! Anchor lifecycle events
//!
//! Published by the engine on a `tokio::sync::broadcast` channel. Sending
//! never blocks; subscribers that fall behind lose the oldest events.

use anchorage_core::{BlockHash, Hash256, TxHash};
use anchorage_economics::Amount;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum AnchorEvent {
    /// A local block gathered enough auths
    AuthQuorumReached {
        block_height: u64,
        block_hash: BlockHash,
        signers: usize,
    },

    /// This node sent an anchor transaction to the external chain
    AnchorBroadcast {
        btc_tx_hash: TxHash,
        defi_block_height: u64,
    },

    /// A pending anchor was appended to the anchor chain
    AnchorPromoted {
        anchor_hash: Hash256,
        previous_anchor: Hash256,
        defi_block_height: u64,
        btc_block_height: u64,
    },

    /// An anchor reached the activation threshold
    AnchorActivated {
        anchor_hash: Hash256,
        defi_block_height: u64,
    },

    /// Reward confirmations reached quorum and a payout was queued
    RewardQuorumReached {
        anchor_hash: Hash256,
        signers: usize,
        amount: Amount,
    },

    RewardPaid {
        anchor_hash: Hash256,
        txid: TxHash,
        reward_address: String,
        amount: Amount,
    },

    /// The block that mined a payout was disconnected
    RewardReverted {
        anchor_hash: Hash256,
        txid: TxHash,
        amount: Amount,
    },
}

impl AnchorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthQuorumReached { .. } => "auth_quorum_reached",
            Self::AnchorBroadcast { .. } => "anchor_broadcast",
            Self::AnchorPromoted { .. } => "anchor_promoted",
            Self::AnchorActivated { .. } => "anchor_activated",
            Self::RewardQuorumReached { .. } => "reward_quorum_reached",
            Self::RewardPaid { .. } => "reward_paid",
            Self::RewardReverted { .. } => "reward_reverted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_is_tagged() {
        let event = AnchorEvent::AnchorActivated {
            anchor_hash: Hash256::new([1; 32]),
            defi_block_height: 15,
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "anchorActivated");
        assert_eq!(json["defi_block_height"], 15);
        assert_eq!(event.name(), "anchor_activated");
    }
}
