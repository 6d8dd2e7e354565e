use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use log::{error, warn};

mod api;
mod blockchain;
mod cli;
mod config;
mod wallet;

use cli::{Cli, Commands};

fn main() {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = Cli::parse();
    let cancel = Arc::new(AtomicBool::new(false));

    // The HTTP server handles its own signals
    if !matches!(cli.command, Commands::Serve { .. }) {
        let flag = cancel.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            warn!("Interrupted, cancelling");
            flag.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install interrupt handler: {}", err);
        }
    }

    if let Err(err) = cli::run(cli, cancel) {
        error!("{:#}", err);
        process::exit(1);
    }
}
