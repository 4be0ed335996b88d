use actix_web::{web, HttpResponse, Responder};
use log::warn;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{Block, ChainResponse, Transaction, TransactionRequest, Wallet};
use crate::node::Node;

/// Shared node handle
pub type NodeData = web::Data<Node>;

/// Plain status message
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub message: String,
}

impl StatusResponse {
    pub fn new(message: impl Into<String>) -> Self {
        StatusResponse {
            message: message.into(),
        }
    }
}

/// Response for the pool endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PoolResponse {
    /// Transactions waiting to be mined, oldest first
    pub transactions: Vec<Transaction>,

    pub length: usize,
}

/// Response for the mine endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

#[derive(Debug, Deserialize)]
pub struct AmountQuery {
    pub blockchain_address: String,
}

/// Response for the amount endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AmountResponse {
    pub amount: f64,
}

/// Response for the create wallet endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// Hex-encoded secret key; the caller must store it
    pub private_key: String,

    /// Hex-encoded public key, sent along with signed transactions
    pub public_key: String,

    pub blockchain_address: String,
}

/// Get the full blockchain
#[utoipa::path(
    get,
    path = "/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(ChainResponse {
        chain: node.ledger().chain(),
    })
}

/// Get all pending transactions
#[utoipa::path(
    get,
    path = "/transactions",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = PoolResponse)
    )
)]
pub async fn get_transactions(node: NodeData) -> impl Responder {
    let transactions = node.ledger().pool();

    HttpResponse::Ok().json(PoolResponse {
        length: transactions.len(),
        transactions,
    })
}

/// Submit a signed transaction
///
/// Accepted transactions are pooled and relayed to every known peer
#[utoipa::path(
    post,
    path = "/transactions",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction pooled", body = StatusResponse),
        (status = 400, description = "Missing fields or invalid signature", body = StatusResponse)
    )
)]
pub async fn new_transaction(node: NodeData, request: web::Json<TransactionRequest>) -> impl Responder {
    match node.submit_transaction(request.into_inner()).await {
        Ok(()) => HttpResponse::Created().json(StatusResponse::new("success")),
        Err(err) => {
            warn!("Failed creating transaction: {}", err);
            HttpResponse::BadRequest().json(StatusResponse::new(err.to_string()))
        }
    }
}

/// Accept a transaction relayed by a peer
#[utoipa::path(
    put,
    path = "/transactions",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction pooled", body = StatusResponse),
        (status = 400, description = "Missing fields or invalid signature", body = StatusResponse)
    )
)]
pub async fn relayed_transaction(
    node: NodeData,
    request: web::Json<TransactionRequest>,
) -> impl Responder {
    match node.receive_relayed_transaction(&request) {
        Ok(()) => HttpResponse::Created().json(StatusResponse::new("success")),
        Err(err) => HttpResponse::BadRequest().json(StatusResponse::new(err.to_string())),
    }
}

/// Mine the transaction pool into a new block
#[utoipa::path(
    get,
    path = "/mine",
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "Nothing to mine or chain changed while mining", body = StatusResponse)
    )
)]
pub async fn mine(node: NodeData) -> impl Responder {
    match node.mine().await {
        Ok(block) => HttpResponse::Ok().json(MineResponse {
            message: "Mining success!".to_string(),
            block,
        }),
        Err(err) => HttpResponse::BadRequest().json(StatusResponse::new(format!(
            "Fail mining transaction pool: {}",
            err
        ))),
    }
}

/// Start periodic mining
#[utoipa::path(
    get,
    path = "/mine/start",
    responses(
        (status = 200, description = "Periodic mining is running", body = StatusResponse)
    )
)]
pub async fn start_mining(node: NodeData) -> impl Responder {
    let message = if node.into_inner().start_mining() {
        "Mining started"
    } else {
        "Mining already running"
    };
    HttpResponse::Ok().json(StatusResponse::new(message))
}

/// Get the committed balance of an address
#[utoipa::path(
    get,
    path = "/amount",
    params(
        ("blockchain_address" = String, Query, description = "Address to total up")
    ),
    responses(
        (status = 200, description = "Balance computed over the committed chain", body = AmountResponse)
    )
)]
pub async fn get_amount(node: NodeData, query: web::Query<AmountQuery>) -> impl Responder {
    HttpResponse::Ok().json(AmountResponse {
        amount: node.ledger().calculate_balance(&query.blockchain_address),
    })
}

/// Reconcile with peers
///
/// Fetches every peer's chain and adopts the longest valid one if it is longer than ours
#[utoipa::path(
    put,
    path = "/consensus",
    responses(
        (status = 200, description = "Reconciliation finished", body = StatusResponse)
    )
)]
pub async fn consensus(node: NodeData) -> impl Responder {
    let message = if node.resolve_conflicts().await {
        "success"
    } else {
        "no change"
    };
    HttpResponse::Ok().json(StatusResponse::new(message))
}

/// Create a new wallet
///
/// The private key must be stored by the caller
#[utoipa::path(
    post,
    path = "/wallet",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse)
    )
)]
pub async fn create_wallet() -> impl Responder {
    let wallet = Wallet::new();

    HttpResponse::Created().json(WalletResponse {
        private_key: wallet.export_secret_key(),
        public_key: wallet.public_key_hex().0,
        blockchain_address: wallet.address().0.clone(),
    })
}

/// Check if the local blockchain is valid
#[utoipa::path(
    get,
    path = "/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = bool)
    )
)]
pub async fn validate_chain(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.ledger().is_valid())
}
