use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};

use super::block::{Block, BlockError};
use super::crypto::sha256;
use super::transaction::Transaction;

/// Number of leading zero bits a block hash must have. Fixed, never adjusted.
pub const DIFFICULTY: u32 = 12;

const _: () = assert!(DIFFICULTY > 0 && DIFFICULTY < 256);

/// Proof-of-work search and validation over a block's content.
///
/// The candidate hash for a nonce is
/// `sha256(prev_hash ‖ bincode(transactions) ‖ nonce_be ‖ difficulty_be)`
/// and is accepted when, read as a big-endian integer, it is strictly below
/// `2^(256 - DIFFICULTY)`.
#[derive(Debug)]
pub struct ProofOfWork {
    /// `prev_hash ‖ bincode(transactions)`, shared by every candidate
    prefix: Vec<u8>,

    target: [u8; 32],
}

impl ProofOfWork {
    /// Prepares a search over the given parent hash and transaction batch
    pub fn new(prev_hash: &[u8], transactions: &[Transaction]) -> Result<Self, BlockError> {
        let mut prefix = prev_hash.to_vec();
        prefix.extend(bincode::serialize(transactions)?);

        Ok(ProofOfWork {
            prefix,
            target: target(DIFFICULTY),
        })
    }

    /// Prepares validation of an existing block
    pub fn for_block(block: &Block) -> Result<Self, BlockError> {
        Self::new(&block.prev_hash, &block.transactions)
    }

    /// Hash of the candidate for `nonce`
    pub fn candidate(&self, nonce: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.prefix.len() + 16);
        data.extend_from_slice(&self.prefix);
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&u64::from(DIFFICULTY).to_be_bytes());
        sha256(&data)
    }

    /// Whether `hash` is below the target
    pub fn meets_target(&self, hash: &[u8]) -> bool {
        hash < &self.target[..]
    }

    /// Searches nonces from zero until a candidate meets the target.
    ///
    /// Runs on the calling thread. Returns `MiningCancelled` as soon as
    /// `cancel` is observed set.
    pub fn run(&self, cancel: &AtomicBool) -> Result<(Vec<u8>, u64), BlockError> {
        for nonce in 0..=u64::MAX {
            if cancel.load(Ordering::Relaxed) {
                debug!("Mining cancelled at nonce {}", nonce);
                return Err(BlockError::MiningCancelled);
            }

            let hash = self.candidate(nonce);
            if self.meets_target(&hash) {
                info!("Found nonce {} for hash {}", nonce, hex::encode(&hash));
                return Ok((hash, nonce));
            }
        }

        Err(BlockError::NonceExhausted)
    }

    /// Recomputes the candidate for `nonce` and checks it both meets the
    /// target and matches the `hash` stored alongside it
    pub fn validate(&self, nonce: u64, hash: &[u8]) -> bool {
        let candidate = self.candidate(nonce);
        self.meets_target(&candidate) && candidate == hash
    }
}

/// `2^(256 - difficulty)` as 32 big-endian bytes
pub fn target(difficulty: u32) -> [u8; 32] {
    let bit = (256 - difficulty) as usize;
    let mut target = [0u8; 32];
    target[31 - bit / 8] = 1 << (bit % 8);
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Address;
    use crate::blockchain::crypto::Wallet;

    fn coinbase() -> Transaction {
        let wallet = Wallet::new();
        Transaction::new_coinbase(wallet.address(), "pow test").unwrap()
    }

    #[test]
    fn test_target_bytes() {
        let t = target(12);
        assert_eq!(t[0], 0x00);
        assert_eq!(t[1], 0x10);
        assert!(t[2..].iter().all(|b| *b == 0));

        let t = target(1);
        assert_eq!(t[0], 0x80);

        let t = target(255);
        assert_eq!(t[31], 0x02);
    }

    #[test]
    fn test_run_finds_valid_nonce() {
        let txs = vec![coinbase()];
        let pow = ProofOfWork::new(b"parent", &txs).unwrap();

        let (hash, nonce) = pow.run(&AtomicBool::new(false)).unwrap();

        assert!(pow.meets_target(&hash));
        assert!(pow.validate(nonce, &hash));
        // the top DIFFICULTY bits are zero
        assert_eq!(hash[0], 0);
        assert!(hash[1] < 0x10);
    }

    #[test]
    fn test_validate_rejects_wrong_nonce_or_hash() {
        let txs = vec![coinbase()];
        let pow = ProofOfWork::new(&[], &txs).unwrap();
        let (hash, nonce) = pow.run(&AtomicBool::new(false)).unwrap();

        let mut other = hash.clone();
        other[31] ^= 0xff;
        assert!(!pow.validate(nonce, &other));

        // a different parent changes every candidate
        let moved = ProofOfWork::new(b"elsewhere", &txs).unwrap();
        assert!(!moved.validate(nonce, &hash));
    }

    #[test]
    fn test_run_honours_cancellation() {
        let txs = vec![Transaction::new_coinbase(&Address::from_public_key(&[7u8; 64]), "x").unwrap()];
        let pow = ProofOfWork::new(&[], &txs).unwrap();

        let result = pow.run(&AtomicBool::new(true));
        assert!(matches!(result, Err(BlockError::MiningCancelled)));
    }
}
