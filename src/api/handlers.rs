use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};

use actix_web::{web, HttpResponse, Responder};
use log::warn;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::transaction::{TxInput, TxOutput};
use crate::blockchain::{Address, Block, Blockchain, ChainError, Transaction, UtxoSet};
use crate::wallet::{WalletError, Wallets};

/// Shared state behind every handler
pub struct ApiState {
    pub chain: Blockchain,

    pub wallet_file: PathBuf,

    /// Serializes wallet file read-modify-write
    pub wallet_lock: Mutex<()>,

    /// Raised to abort in-flight mining
    pub cancel: Arc<AtomicBool>,
}

/// Data structure for the ledger state
pub type LedgerData = web::Data<ApiState>;

/// A transaction input rendered for JSON
#[derive(Serialize, Deserialize, ToSchema)]
pub struct InputView {
    pub prev_tx_id: String,
    pub output_index: i64,
    pub signature: String,
    pub public_key: String,
}

/// A transaction output rendered for JSON
#[derive(Serialize, Deserialize, ToSchema)]
pub struct OutputView {
    pub value: u64,
    pub locking_hash: String,
}

/// A transaction rendered for JSON
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionView {
    pub id: String,
    pub coinbase: bool,

    /// Sum of the output values
    pub total_output: u64,

    pub inputs: Vec<InputView>,
    pub outputs: Vec<OutputView>,
}

/// A block rendered for JSON
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BlockView {
    pub hash: String,
    pub prev_hash: String,
    pub nonce: u64,

    /// Whether the block passes proof-of-work validation
    pub valid: bool,

    pub transactions: Vec<TransactionView>,
}

impl From<&TxInput> for InputView {
    fn from(input: &TxInput) -> Self {
        InputView {
            prev_tx_id: hex::encode(&input.prev_tx_id),
            output_index: input.output_index,
            signature: hex::encode(&input.signature),
            public_key: hex::encode(&input.public_key),
        }
    }
}

impl From<&TxOutput> for OutputView {
    fn from(output: &TxOutput) -> Self {
        OutputView {
            value: output.value,
            locking_hash: hex::encode(&output.locking_hash),
        }
    }
}

impl From<&Transaction> for TransactionView {
    fn from(tx: &Transaction) -> Self {
        TransactionView {
            id: hex::encode(&tx.id),
            coinbase: tx.is_coinbase(),
            total_output: tx.total_output(),
            inputs: tx.inputs.iter().map(InputView::from).collect(),
            outputs: tx.outputs.iter().map(OutputView::from).collect(),
        }
    }
}

impl From<&Block> for BlockView {
    fn from(block: &Block) -> Self {
        BlockView {
            hash: hex::encode(&block.hash),
            prev_hash: hex::encode(&block.prev_hash),
            nonce: block.nonce,
            valid: block.validate(),
            transactions: block.transactions.iter().map(TransactionView::from).collect(),
        }
    }
}

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain, newest first
    pub chain: Vec<BlockView>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: u64,

    /// Ids of the transactions holding the address's unspent outputs, newest first
    pub unspent_transactions: Vec<String>,
}

/// Request for the send endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SendRequest {
    /// Address of a wallet held in the wallet file
    pub from: String,

    /// The recipient's address
    pub to: String,

    /// The amount to transfer
    pub amount: u64,
}

/// Response for the send endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SendResponse {
    pub message: String,

    /// The newly mined block
    pub block: BlockView,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address
    pub address: String,
}

fn error_json(message: String) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

fn chain_error_response(err: ChainError) -> HttpResponse {
    match err {
        ChainError::InsufficientFunds { .. }
        | ChainError::InvalidAmount(_)
        | ChainError::CryptoError(_)
        | ChainError::InvalidTransaction(_) => HttpResponse::BadRequest().json(error_json(err.to_string())),
        _ => {
            warn!("Ledger request failed: {}", err);
            HttpResponse::InternalServerError().json(error_json(err.to_string()))
        }
    }
}

/// Get the full blockchain
///
/// Returns every block from tip to genesis and the chain's validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_chain(ledger: LedgerData) -> impl Responder {
    let blocks: Result<Vec<Block>, ChainError> = ledger.chain.iter().collect();
    let blocks = match blocks {
        Ok(blocks) => blocks,
        Err(err) => return chain_error_response(err),
    };

    let is_valid = match ledger.chain.validate_chain() {
        Ok(valid) => valid,
        Err(err) => return chain_error_response(err),
    };

    let response = ChainResponse {
        length: blocks.len(),
        chain: blocks.iter().map(BlockView::from).collect(),
        is_valid,
    };

    HttpResponse::Ok().json(response)
}

/// Get the balance of an address
///
/// Sums the unspent outputs locked to the address
#[utoipa::path(
    get,
    path = "/api/v1/balance/{address}",
    responses(
        (status = 200, description = "Balance retrieved successfully", body = BalanceResponse),
        (status = 400, description = "Invalid address"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_balance(ledger: LedgerData, address: web::Path<String>) -> impl Responder {
    let address = Address(address.into_inner());

    let locking_hash = match address.locking_hash() {
        Ok(hash) => hash,
        Err(err) => return HttpResponse::BadRequest().json(error_json(err.to_string())),
    };

    let utxo = UtxoSet::new(&ledger.chain);
    let found = utxo
        .balance(&locking_hash)
        .and_then(|balance| Ok((balance, utxo.find_unspent_transactions(&locking_hash)?)));

    match found {
        Ok((balance, transactions)) => HttpResponse::Ok().json(BalanceResponse {
            address: address.0,
            balance,
            unspent_transactions: transactions.iter().map(|tx| hex::encode(&tx.id)).collect(),
        }),
        Err(err) => chain_error_response(err),
    }
}

/// Send coins
///
/// Builds and signs a transfer from a stored wallet and mines it into a new block
#[utoipa::path(
    post,
    path = "/api/v1/send",
    request_body = SendRequest,
    responses(
        (status = 201, description = "Transfer mined successfully", body = SendResponse),
        (status = 400, description = "Invalid transfer request"),
        (status = 404, description = "Sender wallet not found"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn send(ledger: LedgerData, send_req: web::Json<SendRequest>) -> impl Responder {
    let SendRequest { from, to, amount } = send_req.into_inner();

    let to: Address = match to.parse() {
        Ok(address) => address,
        Err(err) => return HttpResponse::BadRequest().json(error_json(err.to_string())),
    };

    let wallet = match Wallets::load(&ledger.wallet_file).and_then(|w| w.get_wallet(&from).cloned()) {
        Ok(wallet) => wallet,
        Err(err @ WalletError::NotFound(_)) => {
            return HttpResponse::NotFound().json(error_json(err.to_string()))
        }
        Err(err) => return HttpResponse::InternalServerError().json(error_json(err.to_string())),
    };

    // mining blocks the thread, keep it off the async workers
    let state = ledger.clone();
    let mined = web::block(move || state.chain.transfer(&wallet, &to, amount, &state.cancel)).await;

    match mined {
        Ok(Ok(block)) => HttpResponse::Created().json(SendResponse {
            message: "Transfer mined".to_string(),
            block: BlockView::from(&block),
        }),
        Ok(Err(err)) => chain_error_response(err),
        Err(err) => HttpResponse::InternalServerError().json(error_json(err.to_string())),
    }
}

/// Create a new wallet
///
/// Generates a keypair and stores it in the wallet file
#[utoipa::path(
    post,
    path = "/api/v1/wallets",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_wallet(ledger: LedgerData) -> impl Responder {
    let _guard = ledger.wallet_lock.lock().unwrap_or_else(PoisonError::into_inner);

    let created = Wallets::load(&ledger.wallet_file).and_then(|mut wallets| {
        let address = wallets.add_wallet();
        wallets.save()?;
        Ok(address)
    });

    match created {
        Ok(address) => HttpResponse::Created().json(WalletResponse { address: address.0 }),
        Err(err) => HttpResponse::InternalServerError().json(error_json(err.to_string())),
    }
}

/// List wallet addresses
///
/// Returns every address held in the wallet file
#[utoipa::path(
    get,
    path = "/api/v1/wallets",
    responses(
        (status = 200, description = "Addresses retrieved successfully", body = Vec<String>),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_addresses(ledger: LedgerData) -> impl Responder {
    match Wallets::load(&ledger.wallet_file) {
        Ok(wallets) => HttpResponse::Ok().json(wallets.addresses()),
        Err(err) => HttpResponse::InternalServerError().json(error_json(err.to_string())),
    }
}
