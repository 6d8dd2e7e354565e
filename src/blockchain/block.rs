use std::fmt;
use std::sync::atomic::AtomicBool;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::proof::ProofOfWork;
use super::transaction::Transaction;

/// Errors that can occur while building or decoding blocks
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Mining was cancelled")]
    MiningCancelled,

    #[error("Nonce space exhausted without meeting the target")]
    NonceExhausted,
}

/// Represents a block in the chain.
///
/// The bincode encoding of this struct is the stored format; field order and
/// types must stay as they are for existing stores to keep decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Proof-of-work hash of the block (the key it is stored under)
    pub hash: Vec<u8>,

    /// Hash of the previous block, empty for genesis
    pub prev_hash: Vec<u8>,

    /// Transactions included in this block, in order
    pub transactions: Vec<Transaction>,

    /// Nonce found by mining
    pub nonce: u64,
}

impl Block {
    /// Mines a block over `transactions` on top of `prev_hash`
    ///
    /// # Arguments
    ///
    /// * `transactions` - The transactions to include in the block
    /// * `prev_hash` - The hash of the previous block
    /// * `cancel` - Flag that aborts the nonce search when set
    ///
    /// # Returns
    ///
    /// The mined block with hash and nonce populated
    pub fn create(
        transactions: Vec<Transaction>,
        prev_hash: Vec<u8>,
        cancel: &AtomicBool,
    ) -> Result<Self, BlockError> {
        let (hash, nonce) = ProofOfWork::new(&prev_hash, &transactions)?.run(cancel)?;

        Ok(Block {
            hash,
            prev_hash,
            transactions,
            nonce,
        })
    }

    /// Mines the first block of a chain around its coinbase transaction
    pub fn genesis(coinbase: Transaction, cancel: &AtomicBool) -> Result<Self, BlockError> {
        Self::create(vec![coinbase], Vec::new(), cancel)
    }

    /// Whether this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    /// Whether the stored nonce produces the stored hash and meets the target
    pub fn validate(&self) -> bool {
        match ProofOfWork::for_block(self) {
            Ok(pow) => pow.validate(self.nonce, &self.hash),
            Err(_) => false,
        }
    }

    /// Encodes the block in its stored format
    pub fn serialize(&self) -> Result<Vec<u8>, BlockError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes a block from its stored format
    pub fn deserialize(bytes: &[u8]) -> Result<Self, BlockError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Previous hash: {}", hex::encode(&self.prev_hash))?;
        writeln!(f, "Hash: {}", hex::encode(&self.hash))?;
        writeln!(f, "Nonce: {}", self.nonce)?;
        for tx in &self.transactions {
            writeln!(f, "{}", tx)?;
        }
        Ok(())
    }
}
