//! Token Bridge Relayer Service
//!
//! A relay service that moves a bridged token between an EVM chain and Solana
//! using burn-and-mint.
//!
//! ## Overview
//!
//! The relayer:
//! 1. Watches `Burn` events on the EVM token contract and burn instructions on
//!    the Solana bridge program
//! 2. Records every burn once in the transfer ledger
//! 3. Mints the burned amount on the counterpart chain and records the outcome
//! 4. Serves a read-only HTTP API over the ledger
//!
//! ## Security Requirements
//!
//! **CRITICAL**: This service holds the mint authority keys of both chains.
//! Ensure proper key management and access controls for production use.

use anyhow::{Context, Result};
use futures::future;
use solana_sdk::signer::Signer;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

use bridge_relayer::api::ApiServer;
use bridge_relayer::chain::ChainAdapter;
use bridge_relayer::config::{Config, CONFIG_PATH_ENV};
use bridge_relayer::crypto::{load_solana_keypair, EvmSigner};
use bridge_relayer::evm_client::EvmClient;
use bridge_relayer::ledger::Ledger;
use bridge_relayer::relay::{Relayer, ShutdownSignal};
use bridge_relayer::retry::RetryPolicy;
use bridge_relayer::svm_client::SvmClient;

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

/// Main application entry point that initializes and runs the relayer.
///
/// This function:
/// 1. Initializes logging and tracing
/// 2. Loads configuration from TOML file
/// 3. Opens and migrates the transfer ledger
/// 4. Loads both signing keys and builds the chain adapters
/// 5. Starts the relay loops and the API server
/// 6. Waits for ctrl-c, then stops everything and closes the ledger last
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging for debugging and monitoring
    tracing_subscriber::fmt::init();

    info!("Starting Token Bridge Relayer");

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("Token Bridge Relayer");
        println!();
        println!("Usage: bridge-relayer [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --config <path>   Use custom config file path");
        println!("  --help, -h        Show this help message");
        println!();
        println!("Environment variables:");
        println!("  BRIDGE_RELAYER_CONFIG_PATH    Path to config file (overrides --config)");
        println!("  SEPOLIA_PRIVATE_KEY           EVM relayer key (name set by evm.private_key_env)");
        println!("  SOLANA_PRIVATE_KEY            Solana relayer keypair (name set by svm.private_key_env)");
        return Ok(());
    }

    let mut config_path = None;
    let mut i = 1; // Skip program name
    while i < args.len() {
        if args[i] == "--config" && i + 1 < args.len() {
            config_path = Some(args[i + 1].clone());
            i += 1;
        }
        i += 1;
    }

    if let Some(path) = config_path {
        if std::env::var(CONFIG_PATH_ENV).is_err() {
            std::env::set_var(CONFIG_PATH_ENV, &path);
        }
        info!("Using custom config: {}", path);
    }

    let config = Config::load()?;
    info!("Configuration loaded successfully");

    let ledger = Ledger::open(&config.ledger.path)
        .with_context(|| format!("Failed to open ledger at {}", config.ledger.path))?;
    ledger.migrate().context("Failed to migrate ledger schema")?;
    info!("Ledger ready at {}", config.ledger.path);

    let retry = RetryPolicy::from_config(&config.relayer);

    let evm_signer = EvmSigner::from_hex(&config.evm.get_private_key()?)
        .context("Failed to load EVM relayer key")?;
    info!("EVM relayer address: {}", evm_signer.address()?);
    let svm_keypair = load_solana_keypair(&config.svm.get_private_key()?)
        .context("Failed to load Solana relayer keypair")?;
    info!("Solana relayer address: {}", svm_keypair.pubkey());

    let evm: Arc<dyn ChainAdapter> =
        Arc::new(EvmClient::new(&config.evm, retry)?.with_signer(evm_signer));
    let svm: Arc<dyn ChainAdapter> =
        Arc::new(SvmClient::new(&config.svm, retry)?.with_keypair(svm_keypair));
    info!(
        "Bridging {} ({}) <-> {} ({})",
        config.evm.name,
        evm.token_address(),
        config.svm.name,
        svm.token_address()
    );

    let mut shutdown_signal = ShutdownSignal::install()?;
    let relayer = Relayer::new(&config, ledger.clone(), evm, svm);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let api = ApiServer::new(config.api.clone(), ledger.clone());
    let mut api_shutdown = shutdown_tx.subscribe();
    let (_, api_server) = api.bind(async move {
        let _ = api_shutdown.recv().await;
    })?;
    let api_handle = tokio::spawn(api_server);

    let loop_handles = relayer.spawn(&shutdown_tx);
    info!("Relayer running ({} loops)", loop_handles.len());

    let signal = shutdown_signal.recv().await?;
    info!("{} received, stopping loops", signal);

    // Receivers may already be gone if a loop exited on its own
    let _ = shutdown_tx.send(());

    for result in future::join_all(loop_handles).await {
        if let Err(e) = result {
            error!("Relay loop task failed: {}", e);
        }
    }
    if let Err(e) = api_handle.await {
        error!("API server task failed: {}", e);
    }

    drop(relayer);
    drop(api);
    ledger.close().context("Failed to close ledger")?;
    info!("Token Bridge Relayer stopped");

    Ok(())
}
