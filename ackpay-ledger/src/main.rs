//! ACK-Pay reference ledger and receipt service.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p ackpay-ledger --release
//!
//! # Run with custom config path
//! CONFIG=/path/to/config.toml cargo run -p ackpay-ledger
//!
//! # Configure logging level
//! RUST_LOG=info cargo run -p ackpay-ledger
//! ```

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy_provider::ProviderBuilder;
use alloy_transport_http::reqwest::Url as RpcUrl;
use axum::http::Method;
use solana_client::nonblocking::rpc_client::RpcClient;
use tower_http::cors;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use ackpay::caip::{AssetId, NetworkId};
use ackpay::did::Did;
use ackpay::identity::{DidDirectory, Keypair};
use ackpay::processor::ProcessorVerifier;
use ackpay::receipt::ReceiptIssuer;
use ackpay::verify::{RetryPolicy, VerifierRegistry};
use ackpay_evm::EvmVerifier;
use ackpay_svm::SolanaVerifier;

use ackpay_ledger::config::{ServiceConfig, parse_balance, parse_seed};
use ackpay_ledger::handlers::{AppState, service_router};
use ackpay_ledger::rail::LedgerRailVerifier;
use ackpay_ledger::store::{LEDGER_NETWORK, LedgerStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("Ledger service failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::load()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        accounts = config.accounts.len(),
        "Loaded configuration"
    );

    let retry = RetryPolicy::new(
        config.retry.max_attempts,
        Duration::from_millis(config.retry.interval_ms),
    );

    let directory = Arc::new(DidDirectory::new());

    // Receipt issuer identity.
    let receipt_did = Did::parse(&config.identity.receipt_did)?;
    let receipt_keypair = Keypair::from_seed(&parse_seed("receipt", &config.identity.receipt_seed)?);
    directory.register(receipt_did.clone(), receipt_keypair.verifying_key());
    let issuer = Arc::new(ReceiptIssuer::new(
        receipt_did,
        receipt_keypair,
        config.receipt_ttl_seconds,
    ));

    // The ledger store, settling the configured asset.
    let asset = AssetId::from_str(&config.ledger.asset)?;
    let receipt_service_url: url::Url =
        format!("http://{}:{}/receipts", config.host, config.port).parse()?;
    let store = Arc::new(LedgerStore::new(
        asset,
        config.ledger.decimals,
        config.ledger.currency.clone(),
        config.demand_ttl_seconds,
        receipt_service_url,
        Arc::clone(&directory),
    ));

    // The resource server is itself a ledger account so it can be paid.
    let server_did = Did::parse(&config.identity.server_did)?;
    let server_seed = parse_seed("server", &config.identity.server_seed)?;
    store.register_account(
        server_did.clone(),
        &server_seed,
        std::collections::HashMap::from([(store.asset().clone(), 0u128)]),
        ackpay::policy::AgentPolicy::default(),
        None,
    );

    for account in &config.accounts {
        let did = Did::parse(&account.did)?;
        let seed = parse_seed(&account.did, &account.seed)?;
        let balance = parse_balance(&account.did, &account.balance)?;
        store.register_account(
            did,
            &seed,
            std::collections::HashMap::from([(store.asset().clone(), balance)]),
            account.policy.clone(),
            None,
        );
    }

    // Settlement rails.
    let mut registry = VerifierRegistry::new();
    registry.register(
        [NetworkId::new(LEDGER_NETWORK)],
        Arc::new(LedgerRailVerifier::new(Arc::clone(&store), retry)),
    );

    if let Some(evm) = &config.rails.evm {
        let network = NetworkId::new(evm.network.as_str());
        let Some(asset) = ackpay_evm::networks::settlement_asset(&network) else {
            return Err(format!("No known settlement asset for EVM rail {network}").into());
        };
        let rpc_url: RpcUrl = evm.rpc_url.parse()?;
        let provider = ProviderBuilder::new().connect_http(rpc_url);
        tracing::info!(network = %network, asset = %asset, "Registered EVM rail");
        registry.register([network], Arc::new(EvmVerifier::new(provider, asset, retry)));
    }

    if let Some(solana) = &config.rails.solana {
        let network = NetworkId::new(solana.network.as_str());
        let Some(mint) = ackpay_svm::networks::settlement_mint(&network) else {
            return Err(format!("No known settlement mint for Solana rail {network}").into());
        };
        let rpc = Arc::new(RpcClient::new(solana.rpc_url.clone()));
        tracing::info!(network = %network, mint = %mint, "Registered Solana rail");
        registry.register([network], Arc::new(SolanaVerifier::new(rpc, mint, retry)));
    }

    if let Some(processor) = &config.rails.processor {
        let network = NetworkId::new(processor.network.as_str());
        tracing::info!(network = %network, "Registered processor rail");
        registry.register([network], Arc::new(ProcessorVerifier::new()));
    }

    let state = AppState {
        store,
        registry: Arc::new(registry),
        issuer,
        directory,
        server_did,
        resource_price: config.resource_price,
    };

    let app = service_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Ledger service listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Ledger service shut down gracefully");
    Ok(())
}

/// Waits for Ctrl-C or SIGTERM (Unix) to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down..."),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl-C");
        tracing::info!("Received Ctrl-C, shutting down...");
    }
}
