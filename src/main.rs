use std::path::PathBuf;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use log::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use powledger::api;
use powledger::blockchain::{self, Blockchain, Wallet};
use powledger::network::{detect_host, HttpPeerClient, PeerDirectory, TcpProbe};
use powledger::{Node, NodeConfig};

/// Proof-of-work ledger node
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address advertised to peers (detected when omitted)
    #[arg(long)]
    host: Option<String>,

    /// Address credited with mining rewards
    #[arg(long)]
    miner_address: Option<String>,

    /// Start periodic mining at boot
    #[arg(long)]
    mine: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };

    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(host) = &cli.host {
        config.network.host = Some(host.clone());
    }
    if let Some(address) = &cli.miner_address {
        config.mining.miner_address = Some(address.clone());
    }
    config.mining.auto_mine |= cli.mine;

    config.validate()?;
    Ok(config)
}

// Build the node from configuration, generating a miner wallet if none is configured
fn build_node(config: &NodeConfig) -> anyhow::Result<Node> {
    let miner_address = match &config.mining.miner_address {
        Some(address) => address.clone(),
        None => {
            let wallet = Wallet::new();
            info!("Created miner wallet with address: {}", wallet.address());
            info!("Miner wallet private key: {}", wallet.export_secret_key());
            wallet.address().0.clone()
        }
    };

    let host = config.network.host.clone().unwrap_or_else(detect_host);
    let peers = PeerDirectory::new(host, config.network.port, config.discovery_range());
    let client = HttpPeerClient::new(config.request_timeout()).context("failed to build HTTP client")?;

    Ok(Node::new(
        Blockchain::new(config.ledger_config(miner_address)),
        peers,
        Arc::new(client),
        Arc::new(TcpProbe::new(config.probe_timeout())),
        config.mining_interval(),
        config.sync_interval(),
    ))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::get_transactions,
        api::handlers::new_transaction,
        api::handlers::relayed_transaction,
        api::handlers::mine,
        api::handlers::start_mining,
        api::handlers::get_amount,
        api::handlers::consensus,
        api::handlers::create_wallet,
        api::handlers::validate_chain
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::TransactionRequest,
            blockchain::ChainResponse,
            api::handlers::StatusResponse,
            api::handlers::PoolResponse,
            api::handlers::MineResponse,
            api::handlers::AmountResponse,
            api::handlers::WalletResponse
        )
    ),
    tags(
        (name = "powledger", description = "Proof-of-work ledger node endpoints")
    ),
    info(
        title = "powledger API",
        version = "0.1.0",
        description = "A minimal proof-of-work ledger node",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let node = web::Data::new(build_node(&config)?);
    let handle = node.clone().into_inner();
    handle.start_sync();
    if config.mining.auto_mine {
        handle.start_mining();
    }

    let bind = (config.network.bind_address.clone(), config.network.port);
    info!(
        "Starting node {} on http://{}:{}",
        node.peers().own_address(),
        bind.0,
        bind.1
    );

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(node.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", ApiDoc::openapi()),
            )
    })
    .bind(bind.clone())
    .with_context(|| format!("cannot bind {}:{}", bind.0, bind.1))?
    .run()
    .await?;

    Ok(())
}
