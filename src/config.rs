use std::path::PathBuf;

/// Default chain store directory
pub const DEFAULT_DATA_DIR: &str = "tmp/blocks";

/// Default wallet file
pub const DEFAULT_WALLET_FILE: &str = "tmp/wallets.data";

/// Default HTTP bind address for `serve`
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Runtime locations resolved from command-line flags and environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the chain store
    pub data_dir: PathBuf,

    /// File holding the wallets
    pub wallet_file: PathBuf,
}

impl Config {
    pub fn new(data_dir: PathBuf, wallet_file: PathBuf) -> Self {
        Config {
            data_dir,
            wallet_file,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(DEFAULT_DATA_DIR.into(), DEFAULT_WALLET_FILE.into())
    }
}
