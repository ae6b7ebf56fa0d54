//! # Anchor Consensus
//!
//! Anchor-based finality for the local chain. A rotating team of masternodes
//! agrees on a recent local block, anchors it into an external proof-of-work
//! chain, and once the anchor is buried deeply enough there the block is
//! final and the anchor's reward address is paid from the community pool.
//!
//! ## Lifecycle Phases
//!
//! 1. Team Selection - auth and confirm teams drawn from recent minters
//! 2. Authentication - auth team signs the block to anchor
//! 3. Broadcast - at auth quorum the anchor tx is sent to the external chain
//! 4. Promotion - one external confirmation links it onto the anchor chain
//! 5. Activation - the activation threshold of confirmations is reached
//! 6. Reward - confirm team signs, the payout is mined, the pool is debited

pub mod anchor;
pub mod auth;
pub mod events;
pub mod finality_engine;
pub mod interfaces;
pub mod payload;
pub mod pending;
pub mod quorum;
pub mod reward;
pub mod team;

// Re-exports
pub use anchor::*;
pub use auth::*;
pub use events::AnchorEvent;
pub use finality_engine::{AnchorSnapshot, EngineStats, FinalityConfig, FinalityEngine};
pub use interfaces::{BlockBuilder, ChainReader, ConnectedBlock, MinedPayout};
pub use payload::AnchorPayload;
pub use pending::{PendingAnchor, PendingTracker, PendingView};
pub use quorum::{QuorumBook, QuorumLeader};
pub use reward::*;
pub use team::{AnchorTeams, TeamSelector};
