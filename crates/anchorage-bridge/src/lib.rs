//! # External Chain Bridge
//!
//! The anchor subsystem borrows timestamps and immutability from an external
//! proof-of-work chain. Everything it needs from that chain goes through the
//! `LightClient` trait:
//!
//! - block height, block time and block hash at a height
//! - the inclusion height of a broadcast transaction
//! - broadcasting an anchor transaction carrying an OP_RETURN payload
//!
//! Two implementations ship with the crate:
//!
//! - `spv::FakeSpv` - in-memory chain for devnet and tests
//! - `bitcoin_rpc::BitcoinRpcClient` - Bitcoin Core wallet over JSON-RPC

use anchorage_core::{AnchorError, BlockHash, TxHash};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod bitcoin_rpc;
pub mod spv;

pub use bitcoin_rpc::{BitcoinRpcClient, BitcoinRpcConfig};
pub use spv::FakeSpv;

/// Light-client access to the external chain
#[async_trait]
pub trait LightClient: Send + Sync {
    /// Bridge name
    fn name(&self) -> &str;

    /// Broadcast an anchor transaction, returning its external hash
    async fn broadcast(&self, tx: ExternalTx) -> Result<TxHash, BridgeError>;

    /// Current external chain height
    async fn current_height(&self) -> Result<u64, BridgeError>;

    /// Block time (unix seconds) at a height
    async fn block_time_at(&self, height: u64) -> Result<i64, BridgeError>;

    /// Block hash at a height
    async fn block_hash_at(&self, height: u64) -> Result<BlockHash, BridgeError>;

    /// Height of the block including `tx`, `None` while unconfirmed
    async fn tx_block_height(&self, tx: &TxHash) -> Result<Option<u64>, BridgeError>;
}

/// Anchor transaction for the external chain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalTx {
    /// OP_RETURN data
    pub payload: Vec<u8>,
}

impl ExternalTx {
    /// Wrap a payload, enforcing the standard OP_RETURN relay limit
    pub fn op_return(payload: Vec<u8>) -> Result<Self, BridgeError> {
        let max = anchorage_core::constants::MAX_OP_RETURN_SIZE;
        if payload.len() > max {
            return Err(BridgeError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }
        Ok(Self { payload })
    }
}

/// Bridge error
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Payload of {size} bytes exceeds {max} byte OP_RETURN limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("No external block at height {0}")]
    UnknownBlock(u64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Light client unreachable")]
    Unreachable,
}

impl From<BridgeError> for AnchorError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::PayloadTooLarge { .. } => AnchorError::InvalidPayload(err.to_string()),
            other => AnchorError::ExternalBridgeUnavailable(other.to_string()),
        }
    }
}
