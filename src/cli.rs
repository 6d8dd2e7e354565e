//! Command-line interface: one subcommand per ledger operation

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use crate::blockchain::{Address, Blockchain, UtxoSet};
use crate::config::{Config, DEFAULT_BIND, DEFAULT_DATA_DIR, DEFAULT_WALLET_FILE};
use crate::wallet::Wallets;

#[derive(Parser)]
#[command(name = "utxo-ledger")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Single-node proof-of-work UTXO ledger", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args)]
pub struct GlobalOpts {
    /// Directory holding the chain store
    #[arg(long, global = true, env = "LEDGER_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// File holding the wallets
    #[arg(long, global = true, env = "LEDGER_WALLET_FILE", default_value = DEFAULT_WALLET_FILE)]
    pub wallet_file: PathBuf,
}

impl From<&GlobalOpts> for Config {
    fn from(opts: &GlobalOpts) -> Self {
        Config::new(opts.data_dir.clone(), opts.wallet_file.clone())
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a blockchain whose genesis reward goes to ADDRESS
    #[command(name = "createblockchain")]
    CreateBlockchain {
        #[arg(long)]
        address: String,
    },

    /// Get the balance of ADDRESS
    #[command(name = "getbalance")]
    GetBalance {
        #[arg(long)]
        address: String,
    },

    /// Send AMOUNT from FROM to TO, mining a new block
    Send {
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        #[arg(long)]
        amount: u64,
    },

    /// Print the blocks in the chain, newest first
    #[command(name = "printchain")]
    PrintChain,

    /// Create a new wallet
    #[command(name = "createwallet")]
    CreateWallet,

    /// List the stored addresses
    #[command(name = "listaddresses")]
    ListAddresses,

    /// Serve the HTTP API
    Serve {
        /// Address to bind the HTTP server to
        #[arg(long, env = "LEDGER_BIND", default_value = DEFAULT_BIND)]
        bind: String,
    },
}

/// Runs one command. `cancel` aborts mining when raised.
pub fn run(cli: Cli, cancel: Arc<AtomicBool>) -> Result<()> {
    let config = Config::from(&cli.global);

    match cli.command {
        Commands::CreateBlockchain { address } => create_blockchain(&config, &address, &cancel),
        Commands::GetBalance { address } => get_balance(&config, &address),
        Commands::Send { from, to, amount } => send(&config, &from, &to, amount, &cancel),
        Commands::PrintChain => print_chain(&config),
        Commands::CreateWallet => create_wallet(&config),
        Commands::ListAddresses => list_addresses(&config),
        Commands::Serve { bind } => crate::api::serve(config, bind, cancel),
    }
}

fn create_blockchain(config: &Config, address: &str, cancel: &AtomicBool) -> Result<()> {
    let address: Address = address.parse()?;
    let chain = Blockchain::init(&config.data_dir, &address, cancel)?;
    chain.close()?;

    println!("Finished!");
    Ok(())
}

fn get_balance(config: &Config, address: &str) -> Result<()> {
    let address: Address = address.parse()?;
    let chain = Blockchain::open(&config.data_dir)?;

    let balance = UtxoSet::new(&chain).balance(&address.locking_hash()?);
    chain.close()?;

    println!("Balance of {}: {}", address, balance?);
    Ok(())
}

fn send(config: &Config, from: &str, to: &str, amount: u64, cancel: &AtomicBool) -> Result<()> {
    let to: Address = to.parse()?;
    let wallets = Wallets::load(&config.wallet_file)?;
    let wallet = wallets.get_wallet(from)?;

    let chain = Blockchain::open(&config.data_dir)?;
    let result = chain.transfer(wallet, &to, amount, cancel);
    chain.close()?;

    let block = result?;
    info!("Transfer mined in block {}", hex::encode(&block.hash));
    println!("Success!");
    Ok(())
}

fn print_chain(config: &Config) -> Result<()> {
    let chain = Blockchain::open(&config.data_dir)?;

    for block in chain.iter() {
        let block = block.context("failed to read block")?;
        print!("{}", block);
        println!("PoW: {}", block.validate());
        println!();
    }

    chain.close()?;
    Ok(())
}

fn create_wallet(config: &Config) -> Result<()> {
    let mut wallets = Wallets::load(&config.wallet_file)?;
    let address = wallets.add_wallet();
    wallets.save()?;

    println!("New address: {}", address);
    Ok(())
}

fn list_addresses(config: &Config) -> Result<()> {
    let wallets = Wallets::load(&config.wallet_file)?;

    for address in wallets.addresses() {
        println!("{}", address);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_send() {
        let cli = Cli::try_parse_from([
            "utxo-ledger",
            "send",
            "--from",
            "a",
            "--to",
            "b",
            "--amount",
            "30",
            "--data-dir",
            "/tmp/chain",
        ])
        .unwrap();

        assert_eq!(cli.global.data_dir, PathBuf::from("/tmp/chain"));
        match cli.command {
            Commands::Send { from, to, amount } => {
                assert_eq!((from.as_str(), to.as_str(), amount), ("a", "b", 30));
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_defaults() {
        std::env::remove_var("LEDGER_DATA_DIR");
        std::env::remove_var("LEDGER_WALLET_FILE");
        let cli = Cli::try_parse_from(["utxo-ledger", "printchain"]).unwrap();

        assert_eq!(Config::from(&cli.global), Config::default());
    }

    #[test]
    fn test_negative_amount_is_rejected() {
        let result = Cli::try_parse_from([
            "utxo-ledger", "send", "--from", "a", "--to", "b", "--amount", "-5",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_end_to_end_commands() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path().join("blocks"), dir.path().join("wallets.data"));
        let cancel = AtomicBool::new(false);

        create_wallet(&config).unwrap();
        create_wallet(&config).unwrap();
        let addresses = Wallets::load(&config.wallet_file).unwrap().addresses();
        let (alice, bob) = (&addresses[0], &addresses[1]);

        create_blockchain(&config, alice, &cancel).unwrap();
        assert!(create_blockchain(&config, alice, &cancel).is_err());

        send(&config, alice, bob, 40, &cancel).unwrap();
        assert!(send(&config, bob, alice, 41, &cancel).is_err());

        let chain = Blockchain::open(&config.data_dir).unwrap();
        let utxo = UtxoSet::new(&chain);
        let bob_hash = Address(bob.clone()).locking_hash().unwrap();
        assert_eq!(utxo.balance(&bob_hash).unwrap(), 40);
        assert!(chain.validate_chain().unwrap());
        chain.close().unwrap();

        print_chain(&config).unwrap();
        get_balance(&config, alice).unwrap();
        assert!(get_balance(&config, "garbage").is_err());
    }
}
