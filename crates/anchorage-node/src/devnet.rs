//! In-memory local chain for devnet and integration tests
//!
//! Genesis masternodes mint blocks round-robin, one every `time_step` of
//! chain time. Reward payouts queued by the finality engine are included
//! in the next minted block.

use anchorage_consensus::{BlockBuilder, ChainReader, ConnectedBlock, MinedPayout, RewardPayout};
use anchorage_core::{BlockHash, Hash256, ValidatorId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const PAYOUT_TX_TAG: &[u8] = b"anchorage/devnet-payout";

/// Payout mined at a devnet height, replayed into the same block on restart
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedPayout {
    pub height: u64,
    pub payout: RewardPayout,
}

#[derive(Clone)]
struct DevBlock {
    hash: BlockHash,
    time: i64,
    /// `None` for genesis
    minter: Option<ValidatorId>,
    payouts: Vec<MinedPayout>,
}

struct DevChainState {
    blocks: Vec<DevBlock>,
    queued: Vec<RewardPayout>,
    /// Extra chain time added to the next block
    skipped: i64,
}

/// Devnet local chain
pub struct DevChain {
    validators: Vec<ValidatorId>,
    time_step: i64,
    state: RwLock<DevChainState>,
}

impl DevChain {
    pub fn new(validators: Vec<ValidatorId>, genesis_time: i64, time_step: i64) -> Self {
        let genesis = DevBlock {
            hash: Hash256::from_content(&genesis_time.to_le_bytes()),
            time: genesis_time,
            minter: None,
            payouts: Vec::new(),
        };
        Self {
            validators,
            time_step,
            state: RwLock::new(DevChainState {
                blocks: vec![genesis],
                queued: Vec::new(),
                skipped: 0,
            }),
        }
    }

    pub fn validators(&self) -> &[ValidatorId] {
        &self.validators
    }

    /// Push the next block's time `secs` further out
    pub fn skip_time(&self, secs: i64) {
        self.state.write().skipped += secs;
    }

    /// Mint the next block, including every queued payout
    pub fn mint(&self) -> ConnectedBlock {
        let mut state = self.state.write();
        let height = state.blocks.len() as u64;
        let (parent_hash, parent_time) = state
            .blocks
            .last()
            .map(|b| (b.hash, b.time))
            .unwrap_or((Hash256::ZERO, 0));
        let time = parent_time + self.time_step + state.skipped;
        state.skipped = 0;

        let minter = if self.validators.is_empty() {
            None
        } else {
            Some(self.validators[(height as usize - 1) % self.validators.len()])
        };

        let mut hasher = blake3::Hasher::new();
        hasher.update(parent_hash.as_bytes());
        hasher.update(&height.to_le_bytes());
        hasher.update(&time.to_le_bytes());
        if let Some(minter) = &minter {
            hasher.update(minter.as_bytes());
        }
        let hash = Hash256::new(*hasher.finalize().as_bytes());

        let payouts: Vec<MinedPayout> = std::mem::take(&mut state.queued)
            .into_iter()
            .map(|payout| MinedPayout {
                txid: payout_txid(&hash, &payout),
                payout,
            })
            .collect();
        for mined in &payouts {
            info!(
                "block {} includes reward payout {} of {} to {}",
                height, mined.txid, mined.payout.amount, mined.payout.reward_address
            );
        }

        state.blocks.push(DevBlock {
            hash,
            time,
            minter,
            payouts: payouts.clone(),
        });
        debug!("minted block {} {} at {}", height, hash, time);

        ConnectedBlock {
            height,
            hash,
            time,
            payouts,
        }
    }

    /// Mint until the tip reaches `height`, without reporting the blocks
    ///
    /// Rebuilds the deterministic devnet chain after a restart. Each recorded
    /// payout is included in the block at its height again, so it gets back
    /// the same txid.
    pub fn fast_forward(&self, height: u64, payouts: &[RecordedPayout]) {
        while self.current_height() < height {
            let next = self.current_height() + 1;
            {
                let mut state = self.state.write();
                state.queued.extend(
                    payouts
                        .iter()
                        .filter(|r| r.height == next)
                        .map(|r| r.payout.clone()),
                );
            }
            self.mint();
        }
    }

    /// Every payout on the chain with the height that mined it
    pub fn recorded_payouts(&self) -> Vec<RecordedPayout> {
        let state = self.state.read();
        state
            .blocks
            .iter()
            .enumerate()
            .flat_map(|(height, block)| {
                block.payouts.iter().map(move |mined| RecordedPayout {
                    height: height as u64,
                    payout: mined.payout.clone(),
                })
            })
            .collect()
    }

    /// Remove the tip, returning it; genesis is never removed
    ///
    /// Payouts mined in the removed block are dropped, the engine re-queues them.
    pub fn disconnect_tip(&self) -> Option<ConnectedBlock> {
        let mut state = self.state.write();
        if state.blocks.len() <= 1 {
            return None;
        }
        let block = state.blocks.pop()?;
        let height = state.blocks.len() as u64;
        debug!("disconnected block {} {}", height, block.hash);
        Some(ConnectedBlock {
            height,
            hash: block.hash,
            time: block.time,
            payouts: block.payouts,
        })
    }

    pub fn block(&self, height: u64) -> Option<ConnectedBlock> {
        let state = self.state.read();
        state.blocks.get(height as usize).map(|b| ConnectedBlock {
            height,
            hash: b.hash,
            time: b.time,
            payouts: b.payouts.clone(),
        })
    }

    pub fn queued_payouts(&self) -> Vec<RewardPayout> {
        self.state.read().queued.clone()
    }
}

fn payout_txid(block_hash: &BlockHash, payout: &RewardPayout) -> Hash256 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(PAYOUT_TX_TAG);
    hasher.update(block_hash.as_bytes());
    hasher.update(payout.anchor_hash.as_bytes());
    hasher.update(&payout.amount.sat().to_le_bytes());
    hasher.update(payout.reward_address.as_bytes());
    Hash256::new(*hasher.finalize().as_bytes())
}

impl ChainReader for DevChain {
    fn current_height(&self) -> u64 {
        self.state.read().blocks.len() as u64 - 1
    }

    fn block_hash_at(&self, height: u64) -> Option<BlockHash> {
        self.state.read().blocks.get(height as usize).map(|b| b.hash)
    }

    fn block_time_at(&self, height: u64) -> Option<i64> {
        self.state.read().blocks.get(height as usize).map(|b| b.time)
    }

    fn validators_minted_since(&self, height: u64, window_secs: i64) -> Vec<ValidatorId> {
        let state = self.state.read();
        let Some(tip) = state.blocks.get(height as usize) else {
            return Vec::new();
        };
        let since = tip.time - window_secs;

        let mut minters: Vec<ValidatorId> = state.blocks[..=height as usize]
            .iter()
            .rev()
            .take_while(|b| b.time >= since)
            .filter_map(|b| b.minter)
            .collect();
        minters.sort();
        minters.dedup();
        minters
    }
}

impl BlockBuilder for DevChain {
    fn queue_reward_payout(&self, payout: RewardPayout) {
        let mut state = self.state.write();
        // one payout per anchor
        state.queued.retain(|p| p.anchor_hash != payout.anchor_hash);
        debug!("queued reward payout for anchor {}", payout.anchor_hash);
        state.queued.push(payout);
    }
}
