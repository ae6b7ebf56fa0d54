//! # Anchorage Core
//!
//! Shared building blocks for the anchor-based finality subsystem.
//!
//! - `Hash256` - local block hashes, external transaction hashes, anchor hashes
//! - `ValidatorId` - masternode identity derived from its operator key
//! - `AnchorError` - the domain error returned by every anchor operation
//!
//! ## Anchor Lifecycle
//!
//! ```text
//!   auth quorum ──► pending ──► anchored ──► active ──► rewarded
//!   (team votes)   (broadcast)  (1 conf)    (6 confs)   (payout mined)
//! ```

pub mod error;
pub mod types;

pub use error::*;
pub use types::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{AnchorError, Result};
    pub use crate::types::constants;
    pub use crate::types::{BlockHash, Hash256, TxHash, ValidatorId};
}
