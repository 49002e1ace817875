//! Get Relayer Addresses
//!
//! Reads the bridge-relayer configuration and prints the relayer address on
//! each chain, derived from the keys in the configured environment variables.
//! These addresses must hold mint authority (EVM token contract) and be the
//! bridge authority (Solana program) before the relayer can settle transfers.
//!
//! ## Usage
//!
//! ```bash
//! BRIDGE_RELAYER_CONFIG_PATH=config/bridge-relayer.toml \
//!   cargo run --bin get_relayer_addresses
//! ```

use anyhow::Result;
use bridge_relayer::config::Config;
use bridge_relayer::crypto::{load_solana_keypair, EvmSigner};
use bridge_relayer::svm_client::SvmClient;
use bridge_relayer::RetryPolicy;
use solana_sdk::signer::Signer;

fn main() -> Result<()> {
    let config = Config::load()?;

    let evm_signer = EvmSigner::from_hex(&config.evm.get_private_key()?)?;
    let svm_keypair = load_solana_keypair(&config.svm.get_private_key()?)?;
    let svm_client = SvmClient::new(&config.svm, RetryPolicy::default())?;

    println!("Relayer addresses derived from configured keys:");
    println!();
    println!("EVM_RELAYER_ADDR={}", evm_signer.address()?);
    println!("SVM_RELAYER_ADDR={}", svm_keypair.pubkey());
    println!("SVM_BRIDGE_PDA={}", svm_client.bridge_pda());
    println!();
    println!("Grant these before starting the relayer:");
    println!("  - {} on {}: minter role for EVM_RELAYER_ADDR", config.evm.token_addr, config.evm.name);
    println!("  - {} on {}: bridge authority = SVM_RELAYER_ADDR", config.svm.program_id, config.svm.name);

    Ok(())
}
