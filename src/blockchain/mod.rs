// Blockchain module
//
// This module contains the ledger engine:
// - Transaction and Block data model
// - Wallet keys and signatures
// - Proof of work search and validation
// - The ledger: pool, chain, mining, balances and reconciliation

pub mod block;
pub mod chain;
pub mod crypto;
pub mod pow;
pub mod transaction;

// Re-export main components for easier access
pub use block::{Block, Hash};
pub use chain::{Blockchain, BlockchainError, ChainResponse, LedgerConfig};
pub use crypto::{Address, DigitalSignature, PublicKeyHex, Wallet};
pub use transaction::{Transaction, TransactionError, TransactionRequest, REWARD_SENDER};
