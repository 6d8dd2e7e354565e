// Blockchain module
//
// This module contains the core ledger implementation including:
// - Cryptography utilities and the wallet keypair
// - Proof of work algorithm
// - Block structure
// - Transaction structure, signing and verification
// - Persistent chain store and backward iteration
// - UTXO discovery

pub mod block;
pub mod chain;
pub mod crypto;
pub mod proof;
pub mod storage;
pub mod transaction;
pub mod utxo;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, ChainError};
pub use crypto::Address;
pub use transaction::Transaction;
pub use utxo::UtxoSet;
