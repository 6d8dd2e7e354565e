use std::path::Path;

use log::debug;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Tree};
use thiserror::Error;

use super::block::{Block, BlockError};

/// Key holding the hash of the most recently appended block
pub const TIP_KEY: &[u8] = b"lh";

/// File whose presence marks an existing store
pub const MARKER_FILE: &str = "db";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Block encoding error: {0}")]
    Block(#[from] BlockError),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Block write aborted")]
    WriteAborted,
}

/// Key-value store holding `hash -> serialized block` and the tip pointer
pub struct BlockchainStorage {
    /// The database instance
    db: Db,

    /// Tree for blocks and the tip key
    blocks: Tree,
}

impl std::fmt::Debug for BlockchainStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainStorage").finish()
    }
}

impl BlockchainStorage {
    /// Whether a store already exists at `path`
    pub fn exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().join(MARKER_FILE).exists()
    }

    /// Opens (creating if needed) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let blocks = db.open_tree("blocks")?;

        Ok(Self { db, blocks })
    }

    /// Writes `block` under its hash and points the tip at it, atomically
    pub fn insert_block(&self, block: &Block) -> Result<(), StorageError> {
        let value = block.serialize()?;
        let key = block.hash.as_slice();

        self.blocks
            .transaction(|tx| {
                tx.insert(key, value.as_slice())?;
                tx.insert(TIP_KEY, key)?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e| match e {
                TransactionError::Storage(e) => StorageError::DatabaseError(e),
                TransactionError::Abort(()) => StorageError::WriteAborted,
            })?;

        debug!("Stored block {}", hex::encode(key));
        Ok(())
    }

    /// Gets a block by its hash
    pub fn get_block(&self, hash: &[u8]) -> Result<Block, StorageError> {
        match self.blocks.get(hash)? {
            Some(value) => Ok(Block::deserialize(&value)?),
            None => Err(StorageError::NotFound(format!(
                "Block with hash {} not found",
                hex::encode(hash)
            ))),
        }
    }

    /// Gets the tip hash
    pub fn get_tip(&self) -> Result<Vec<u8>, StorageError> {
        match self.blocks.get(TIP_KEY)? {
            Some(value) => Ok(value.to_vec()),
            None => Err(StorageError::NotFound("Tip hash not found".to_string())),
        }
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
