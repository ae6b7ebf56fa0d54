//! In-memory light client
//!
//! Stands in for an external chain on devnet and in tests. The chain tip is
//! moved explicitly with `set_last_height`; a broadcast transaction is
//! included in the block at the current tip.

use crate::{BridgeError, ExternalTx, LightClient};
use anchorage_core::{BlockHash, Hash256, TxHash};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Unix time of external block 0
pub const FAKE_GENESIS_TIME: i64 = 1_600_000_000;

/// Seconds between external blocks
pub const FAKE_BLOCK_INTERVAL_SECS: i64 = 600;

struct SpvState {
    last_height: u64,
    txs: HashMap<TxHash, Option<u64>>,
    reachable: bool,
}

/// Fake SPV light client
pub struct FakeSpv {
    state: RwLock<SpvState>,
}

impl FakeSpv {
    pub fn new(last_height: u64) -> Self {
        Self {
            state: RwLock::new(SpvState {
                last_height,
                txs: HashMap::new(),
                reachable: true,
            }),
        }
    }

    /// Move the external tip
    pub fn set_last_height(&self, height: u64) {
        self.state.write().last_height = height;
    }

    pub fn last_height(&self) -> u64 {
        self.state.read().last_height
    }

    /// Simulate an outage; every call fails with `Unreachable` while off
    pub fn set_reachable(&self, reachable: bool) {
        self.state.write().reachable = reachable;
    }

    /// Override the inclusion height of a known transaction
    pub fn set_tx_height(&self, tx: TxHash, height: Option<u64>) {
        self.state.write().txs.insert(tx, height);
    }

    /// Reorganize the external chain down to `height`
    ///
    /// Transactions included above the new tip drop back to unconfirmed.
    pub fn reorg_to(&self, height: u64) {
        let mut state = self.state.write();
        state.last_height = height;
        for included in state.txs.values_mut() {
            if matches!(included, Some(h) if *h > height) {
                *included = None;
            }
        }
        debug!("fake spv reorganized to height {}", height);
    }

    /// Hash a broadcast payload receives
    pub fn tx_hash_of(tx: &ExternalTx) -> TxHash {
        Hash256::from_content(&tx.payload)
    }

    fn check_reachable(&self) -> Result<(), BridgeError> {
        if self.state.read().reachable {
            Ok(())
        } else {
            Err(BridgeError::Unreachable)
        }
    }

    fn check_height(&self, height: u64) -> Result<(), BridgeError> {
        if height > self.state.read().last_height {
            return Err(BridgeError::UnknownBlock(height));
        }
        Ok(())
    }
}

impl Default for FakeSpv {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl LightClient for FakeSpv {
    fn name(&self) -> &str {
        "fake-spv"
    }

    async fn broadcast(&self, tx: ExternalTx) -> Result<TxHash, BridgeError> {
        self.check_reachable()?;
        let hash = Self::tx_hash_of(&tx);
        let mut state = self.state.write();
        let height = state.last_height;
        state.txs.entry(hash).or_insert(Some(height));
        debug!("fake spv included tx {} at height {}", hash, height);
        Ok(hash)
    }

    async fn current_height(&self) -> Result<u64, BridgeError> {
        self.check_reachable()?;
        Ok(self.state.read().last_height)
    }

    async fn block_time_at(&self, height: u64) -> Result<i64, BridgeError> {
        self.check_reachable()?;
        self.check_height(height)?;
        Ok(FAKE_GENESIS_TIME + height as i64 * FAKE_BLOCK_INTERVAL_SECS)
    }

    async fn block_hash_at(&self, height: u64) -> Result<BlockHash, BridgeError> {
        self.check_reachable()?;
        self.check_height(height)?;
        let mut content = b"fake-spv-block".to_vec();
        content.extend_from_slice(&height.to_le_bytes());
        Ok(Hash256::from_content(&content))
    }

    async fn tx_block_height(&self, tx: &TxHash) -> Result<Option<u64>, BridgeError> {
        self.check_reachable()?;
        Ok(self.state.read().txs.get(tx).copied().flatten())
    }
}
