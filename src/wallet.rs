//! On-disk collection of wallets, keyed by address.
//!
//! The file is a JSON object mapping each address to its hex-encoded secret key.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

use crate::blockchain::crypto::{CryptoError, Wallet};
use crate::blockchain::Address;

/// Errors that can occur while loading or saving wallets
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid secret key encoding: {0}")]
    Encoding(#[from] hex::FromHexError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Wallet not found for address {0}")]
    NotFound(String),
}

/// All wallets stored in one file
#[derive(Debug)]
pub struct Wallets {
    path: PathBuf,
    wallets: BTreeMap<String, Wallet>,
}

impl Wallets {
    /// Loads the wallets at `path`; a missing file yields an empty collection
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        let path = path.as_ref().to_path_buf();
        let mut wallets = BTreeMap::new();

        if path.exists() {
            let content = fs::read_to_string(&path)?;
            let keys: BTreeMap<String, String> = serde_json::from_str(&content)?;

            for (address, secret) in keys {
                let wallet = Wallet::from_secret_key(&hex::decode(secret)?)?;
                wallets.insert(address, wallet);
            }
            debug!("Loaded {} wallets from {}", wallets.len(), path.display());
        }

        Ok(Wallets { path, wallets })
    }

    /// Generates a new wallet and returns its address. Call [`Wallets::save`] to persist it.
    pub fn add_wallet(&mut self) -> Address {
        let wallet = Wallet::new();
        let address = wallet.address().clone();

        self.wallets.insert(address.0.clone(), wallet);
        info!("Created wallet {}", address);

        address
    }

    /// Gets the wallet owning `address`
    pub fn get_wallet(&self, address: &str) -> Result<&Wallet, WalletError> {
        self.wallets
            .get(address)
            .ok_or_else(|| WalletError::NotFound(address.to_string()))
    }

    /// All stored addresses, sorted
    pub fn addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    /// Writes every wallet back to the file
    pub fn save(&self) -> Result<(), WalletError> {
        let keys: BTreeMap<&String, String> = self
            .wallets
            .iter()
            .map(|(address, wallet)| (address, hex::encode(wallet.export_secret_key())))
            .collect();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&keys)?)?;

        Ok(())
    }
}
