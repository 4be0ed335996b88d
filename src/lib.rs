//! A minimal proof-of-work ledger node.
//!
//! Each node keeps a hash-linked chain of blocks and a pool of signed transfers, seals
//! the pool by proof of work, and converges with sibling nodes on the longest valid chain.

pub mod api;
pub mod blockchain;
pub mod config;
pub mod network;
pub mod node;

pub use config::NodeConfig;
pub use node::{Node, NodeError};
