//! # Anchorage Node
//!
//! Devnet host for the anchor finality engine: an in-memory local chain,
//! a fake or Bitcoin Core backed external chain, RocksDB persistence, a
//! JSON-RPC listing API and Prometheus metrics.

pub mod config;
pub mod devnet;
pub mod genesis;
pub mod metrics;
pub mod node;
pub mod rpc_server;

pub use config::NodeConfig;
pub use devnet::DevChain;
pub use node::{AnchorageNode, NodeState};
