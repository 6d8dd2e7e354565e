use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Mutex, PoisonError, RwLock};

use log::{info, warn};
use thiserror::Error;

use super::block::{Block, BlockError};
use super::crypto::{Address, CryptoError, Wallet};
use super::storage::{BlockchainStorage, StorageError};
use super::transaction::{PriorTransactions, Transaction, TransactionError};
use super::utxo::UtxoSet;

/// Memo carried by the genesis coinbase
pub const GENESIS_DATA: &str = "This is where it all started";

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Blockchain already exists at {0}")]
    StoreAlreadyExists(String),

    #[error("No existing blockchain found at {0}")]
    StoreNotFound(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(u64),

    #[error("Previous transaction does not exist: {0}")]
    MissingPriorTransaction(String),

    #[error("Transaction failed verification: {0}")]
    InvalidTransaction(String),

    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Block error: {0}")]
    BlockError(#[from] BlockError),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

/// Handle on a persisted chain.
///
/// Created by [`Blockchain::init`] or [`Blockchain::open`] and released by
/// [`Blockchain::close`] (or on drop). Appends are serialized by an internal
/// lock; readers snapshot the tip when they start.
#[derive(Debug)]
pub struct Blockchain {
    storage: BlockchainStorage,

    /// In-process copy of the tip hash
    tip: RwLock<Vec<u8>>,

    /// Held across read-tip, mine, write and advance
    append_lock: Mutex<()>,
}

impl Blockchain {
    /// Creates a new chain at `path` whose genesis coinbase pays `address`
    ///
    /// # Arguments
    ///
    /// * `path` - The store directory; must not already hold a chain
    /// * `address` - The address receiving the genesis reward
    /// * `cancel` - Flag that aborts mining the genesis block
    ///
    /// # Returns
    ///
    /// The open chain with genesis as its tip
    pub fn init<P: AsRef<Path>>(
        path: P,
        address: &Address,
        cancel: &AtomicBool,
    ) -> Result<Self, ChainError> {
        let path = path.as_ref();
        if BlockchainStorage::exists(path) {
            return Err(ChainError::StoreAlreadyExists(path.display().to_string()));
        }

        // built before touching the disk so a bad address leaves nothing behind
        let coinbase = Transaction::new_coinbase(address, GENESIS_DATA)?;
        let genesis = Block::genesis(coinbase, cancel)?;
        info!("Genesis created: {}", hex::encode(&genesis.hash));

        let storage = BlockchainStorage::open(path)?;
        storage.insert_block(&genesis)?;
        storage.flush()?;

        Ok(Blockchain {
            storage,
            tip: RwLock::new(genesis.hash),
            append_lock: Mutex::new(()),
        })
    }

    /// Opens an existing chain at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ChainError> {
        let path = path.as_ref();
        if !BlockchainStorage::exists(path) {
            return Err(ChainError::StoreNotFound(path.display().to_string()));
        }

        let storage = BlockchainStorage::open(path)?;
        let tip = storage.get_tip()?;
        info!("Opened blockchain at {} with tip {}", path.display(), hex::encode(&tip));

        Ok(Blockchain {
            storage,
            tip: RwLock::new(tip),
            append_lock: Mutex::new(()),
        })
    }

    /// Hash of the most recently appended block
    pub fn tip(&self) -> Vec<u8> {
        self.tip
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mines a block over `transactions` on top of the current tip, persists
    /// it and advances the tip
    pub fn append(&self, transactions: Vec<Transaction>, cancel: &AtomicBool) -> Result<Block, ChainError> {
        let _guard = self
            .append_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let last_hash = self.storage.get_tip()?;
        let block = Block::create(transactions, last_hash, cancel)?;

        self.storage.insert_block(&block)?;
        *self.tip.write().unwrap_or_else(PoisonError::into_inner) = block.hash.clone();

        info!("Appended block {}", hex::encode(&block.hash));
        Ok(block)
    }

    /// Iterates blocks from the current tip back to genesis
    pub fn iter(&self) -> ChainIterator<'_> {
        ChainIterator {
            current_hash: Some(self.tip()),
            storage: &self.storage,
        }
    }

    /// Flushes and releases the store
    pub fn close(self) -> Result<(), ChainError> {
        self.storage.flush()?;
        info!("Blockchain closed");
        Ok(())
    }

    /// Finds a transaction by id anywhere in the chain
    pub fn find_transaction(&self, id: &[u8]) -> Result<Option<Transaction>, ChainError> {
        for block in self.iter() {
            if let Some(tx) = block?.transactions.into_iter().find(|tx| tx.id == id) {
                return Ok(Some(tx));
            }
        }

        Ok(None)
    }

    /// Collects the transactions referenced by `tx`'s inputs
    pub fn prior_transactions(&self, tx: &Transaction) -> Result<PriorTransactions, ChainError> {
        let mut priors = PriorTransactions::new();

        for input in &tx.inputs {
            if priors.contains_key(&input.prev_tx_id) {
                continue;
            }

            match self.find_transaction(&input.prev_tx_id)? {
                Some(prior) => {
                    priors.insert(input.prev_tx_id.clone(), prior);
                }
                None => {
                    return Err(ChainError::MissingPriorTransaction(hex::encode(
                        &input.prev_tx_id,
                    )))
                }
            }
        }

        Ok(priors)
    }

    /// Signs `tx` with `wallet` against the prior transactions found in the chain
    pub fn sign_transaction(&self, tx: &mut Transaction, wallet: &Wallet) -> Result<(), ChainError> {
        if tx.is_coinbase() {
            return Ok(());
        }

        let priors = self.prior_transactions(tx)?;
        tx.sign(wallet, &priors)?;
        Ok(())
    }

    /// Verifies `tx` against the prior transactions found in the chain
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool, ChainError> {
        if tx.is_coinbase() {
            return Ok(true);
        }

        let priors = self.prior_transactions(tx)?;
        Ok(tx.verify(&priors)?)
    }

    /// Builds and signs a transfer of `amount` from `from` to `to`.
    ///
    /// Does not touch the chain.
    pub fn new_transfer(&self, from: &Wallet, to: &Address, amount: u64) -> Result<Transaction, ChainError> {
        if amount == 0 {
            return Err(ChainError::InvalidAmount(amount));
        }

        let to_hash = to.locking_hash()?;
        let spendable = UtxoSet::new(self).find_spendable_outputs(&from.public_key_hash(), amount)?;

        if spendable.accumulated < amount {
            return Err(ChainError::InsufficientFunds {
                required: amount,
                available: spendable.accumulated,
            });
        }

        let mut tx = Transaction::new_transfer(
            from,
            to_hash,
            amount,
            spendable.accumulated,
            &spendable.outputs,
        )?;
        self.sign_transaction(&mut tx, from)?;

        Ok(tx)
    }

    /// Builds, verifies and appends a transfer in its own block
    pub fn transfer(
        &self,
        from: &Wallet,
        to: &Address,
        amount: u64,
        cancel: &AtomicBool,
    ) -> Result<Block, ChainError> {
        let tx = self.new_transfer(from, to, amount)?;

        if !self.verify_transaction(&tx)? {
            warn!("Rejected transaction {}", hex::encode(&tx.id));
            return Err(ChainError::InvalidTransaction(hex::encode(&tx.id)));
        }

        self.append(vec![tx], cancel)
    }

    /// Checks every block from tip to genesis is mined and linked to its parent
    pub fn validate_chain(&self) -> Result<bool, ChainError> {
        let mut expected_hash = self.tip();

        for block in self.iter() {
            let block = block?;
            if block.hash != expected_hash || !block.validate() {
                warn!("Block {} failed validation", hex::encode(&block.hash));
                return Ok(false);
            }
            expected_hash = block.prev_hash;
        }

        Ok(true)
    }
}

/// Cursor walking blocks from a snapshot of the tip back to genesis.
///
/// Yields genesis last, then ends. A storage error is yielded once and
/// also ends the walk.
pub struct ChainIterator<'a> {
    current_hash: Option<Vec<u8>>,
    storage: &'a BlockchainStorage,
}

impl<'a> Iterator for ChainIterator<'a> {
    type Item = Result<Block, ChainError>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current_hash.take()?;

        match self.storage.get_block(&hash) {
            Ok(block) => {
                if !block.is_genesis() {
                    self.current_hash = Some(block.prev_hash.clone());
                }
                Some(Ok(block))
            }
            Err(err) => Some(Err(err.into())),
        }
    }
}
