//! Configuration Management Module
//!
//! This module handles loading and managing configuration for the bridge relayer.
//! Configuration includes chain endpoints, token and program addresses, the names of
//! the environment variables holding signing keys, loop timing, storage and API settings.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

/// Environment variable that overrides the configuration file path.
pub const CONFIG_PATH_ENV: &str = "BRIDGE_RELAYER_CONFIG_PATH";

/// Default configuration file path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/bridge-relayer.toml";

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all service settings.
///
/// This structure holds configuration for:
/// - The EVM chain (burn source for EVM -> Solana, mint target for Solana -> EVM)
/// - The Solana chain (burn source for Solana -> EVM, mint target for EVM -> Solana)
/// - Relay loop timing and retry limits
/// - Transfer ledger storage
/// - API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// EVM chain configuration
    pub evm: EvmChainConfig,
    /// Solana chain configuration
    pub svm: SvmChainConfig,
    /// Relay loop configuration (intervals, retry ceiling, backoff)
    #[serde(default)]
    pub relayer: RelayerConfig,
    /// Transfer ledger storage configuration
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// API server configuration (host, port, CORS settings)
    #[serde(default)]
    pub api: ApiConfig,
}

/// Configuration for the EVM chain hosting the bridged ERC-20 token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmChainConfig {
    /// Human-readable name for the chain
    pub name: String,
    /// RPC endpoint URL for EVM chain communication
    pub rpc_url: String,
    /// EIP-155 chain ID used when signing mint transactions (11155111 for Sepolia)
    pub chain_id: u64,
    /// Address of the bridged token contract (emits `Burn`, accepts `mint`)
    pub token_addr: String,
    /// Address of the EVM bridge contract (informational, not called by the relayer)
    #[serde(default)]
    pub bridge_addr: Option<String>,
    /// Blocks a burn must be buried under before it is scanned, and confirmations
    /// awaited after a mint
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// How far behind the head the first scan starts when no cursor is stored
    #[serde(default = "default_initial_lookback_blocks")]
    pub initial_lookback_blocks: u64,
    /// Gas limit for mint transactions
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    /// Maximum time to wait for a mint receipt and its confirmations, in milliseconds
    #[serde(default = "default_receipt_timeout_ms")]
    pub receipt_timeout_ms: u64,
    /// Environment variable name containing the relayer's secp256k1 private key (hex)
    #[serde(default = "default_evm_private_key_env")]
    pub private_key_env: String,
}

/// Configuration for the Solana chain hosting the bridge program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvmChainConfig {
    /// Human-readable name for the chain
    pub name: String,
    /// RPC endpoint URL for Solana chain communication
    pub rpc_url: String,
    /// Program ID of the bridge program (emits burns, completes transfers)
    pub program_id: String,
    /// SPL token mint of the bridged token
    pub token_mint: String,
    /// Maximum signatures requested per `getSignaturesForAddress` call
    #[serde(default = "default_signature_page_limit")]
    pub signature_page_limit: usize,
    /// Environment variable name containing the relayer keypair
    /// (JSON byte array, base58 or base64)
    #[serde(default = "default_svm_private_key_env")]
    pub private_key_env: String,
}

/// Relay loop timing, retry ceiling and rate-limit backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerConfig {
    /// Interval between ingestion cycles in milliseconds
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    /// Interval between settlement cycles in milliseconds
    #[serde(default = "default_processing_interval_ms")]
    pub processing_interval_ms: u64,
    /// Retry ceiling: transfers with this many failed attempts are no longer selected
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Whether failed transfers below the ceiling are re-selected by settlement
    #[serde(default = "default_retry_failed")]
    pub retry_failed: bool,
    /// Rate-limit retry budget for a single RPC call
    #[serde(default = "default_rate_limit_max_retries")]
    pub rate_limit_max_retries: u32,
    /// Initial rate-limit backoff in milliseconds (doubles on each retry)
    #[serde(default = "default_rate_limit_initial_delay_ms")]
    pub rate_limit_initial_delay_ms: u64,
}

/// Transfer ledger storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_ledger_path")]
    pub path: String,
}

/// API server configuration for external communication.
///
/// Controls how the relayer exposes its read-only REST endpoints
/// and handles cross-origin requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host address to bind the API server to
    pub host: String,
    /// Port number to bind the API server to
    pub port: u16,
    /// Allowed CORS origins for cross-origin requests
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_confirmations() -> u64 {
    2
}

fn default_initial_lookback_blocks() -> u64 {
    1000
}

fn default_gas_limit() -> u64 {
    200_000
}

fn default_receipt_timeout_ms() -> u64 {
    180_000
}

fn default_evm_private_key_env() -> String {
    "SEPOLIA_PRIVATE_KEY".to_string()
}

fn default_signature_page_limit() -> usize {
    100
}

fn default_svm_private_key_env() -> String {
    "SOLANA_PRIVATE_KEY".to_string()
}

fn default_polling_interval_ms() -> u64 {
    15_000
}

fn default_processing_interval_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_failed() -> bool {
    true
}

fn default_rate_limit_max_retries() -> u32 {
    5
}

fn default_rate_limit_initial_delay_ms() -> u64 {
    500
}

fn default_ledger_path() -> String {
    "data/token-bridge.db".to_string()
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: default_polling_interval_ms(),
            processing_interval_ms: default_processing_interval_ms(),
            max_retries: default_max_retries(),
            retry_failed: default_retry_failed(),
            rate_limit_max_retries: default_rate_limit_max_retries(),
            rate_limit_initial_delay_ms: default_rate_limit_initial_delay_ms(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4000,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl EvmChainConfig {
    /// Loads the relayer's EVM private key from the environment variable.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The private key (hex, with or without `0x`)
    /// * `Err(anyhow::Error)` - Variable not set or empty
    pub fn get_private_key(&self) -> anyhow::Result<String> {
        read_secret_env(&self.private_key_env, "secp256k1 private key (hex)")
    }
}

impl SvmChainConfig {
    /// Loads the relayer's Solana keypair material from the environment variable.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Keypair as JSON byte array, base58 or base64
    /// * `Err(anyhow::Error)` - Variable not set or empty
    pub fn get_private_key(&self) -> anyhow::Result<String> {
        read_secret_env(&self.private_key_env, "Solana keypair (JSON array, base58 or base64)")
    }
}

fn read_secret_env(var: &str, what: &str) -> anyhow::Result<String> {
    let value = std::env::var(var).map_err(|_| {
        anyhow::anyhow!(
            "Environment variable '{}' not set. Please set it with the relayer {}.",
            var,
            what
        )
    })?;
    if value.trim().is_empty() {
        anyhow::bail!("Environment variable '{}' is empty", var);
    }
    Ok(value)
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Validates chain endpoints, addresses and timing parameters.
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Configuration is valid
    /// - `Err(anyhow::Error)` - First invalid field found
    pub fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.evm.rpc_url)
            .map_err(|e| anyhow::anyhow!("Invalid evm.rpc_url '{}': {}", self.evm.rpc_url, e))?;
        url::Url::parse(&self.svm.rpc_url)
            .map_err(|e| anyhow::anyhow!("Invalid svm.rpc_url '{}': {}", self.svm.rpc_url, e))?;

        validate_evm_address(&self.evm.token_addr)
            .map_err(|e| anyhow::anyhow!("Invalid evm.token_addr: {}", e))?;
        if let Some(ref bridge_addr) = self.evm.bridge_addr {
            validate_evm_address(bridge_addr)
                .map_err(|e| anyhow::anyhow!("Invalid evm.bridge_addr: {}", e))?;
        }

        Pubkey::from_str(&self.svm.program_id)
            .map_err(|_| anyhow::anyhow!("Invalid svm.program_id (expected base58 pubkey)"))?;
        Pubkey::from_str(&self.svm.token_mint)
            .map_err(|_| anyhow::anyhow!("Invalid svm.token_mint (expected base58 pubkey)"))?;

        if self.svm.signature_page_limit == 0 || self.svm.signature_page_limit > 1000 {
            anyhow::bail!("svm.signature_page_limit must be between 1 and 1000");
        }
        if self.relayer.polling_interval_ms == 0 || self.relayer.processing_interval_ms == 0 {
            anyhow::bail!("relayer intervals must be greater than zero");
        }
        if self.relayer.max_retries == 0 {
            anyhow::bail!("relayer.max_retries must be greater than zero");
        }

        Ok(())
    }

    /// Loads configuration from the TOML file.
    ///
    /// This function:
    /// 1. Resolves the path from `BRIDGE_RELAYER_CONFIG_PATH` or the default location
    /// 2. If it exists, loads and parses the configuration
    /// 3. Validates the configuration
    /// 4. If it doesn't exist, returns an error asking user to copy template
    ///
    /// # Returns
    ///
    /// - `Ok(Config)` - Successfully loaded and validated configuration
    /// - `Err(anyhow::Error)` - File missing, unparsable, or invalid
    pub fn load() -> anyhow::Result<Self> {
        let config_path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/bridge-relayer.template.toml config/bridge-relayer.toml\n\
                Then edit config/bridge-relayer.toml with your actual values.",
                config_path
            ))
        }
    }

    /// Creates a default configuration pointing at Sepolia and Solana devnet
    /// with the Flappy token deployment.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self {
            evm: EvmChainConfig {
                name: "Sepolia".to_string(),
                rpc_url: "https://sepolia.infura.io/v3/YOUR_INFURA_KEY".to_string(),
                chain_id: 11_155_111,
                token_addr: "0xE6a10059f1206aCf2925Bbcc7dECD54AbD6DeFd1".to_string(),
                bridge_addr: Some("0x56AD7aeD091C804D845F4F1a397E8dED41e61eb4".to_string()),
                confirmations: default_confirmations(),
                initial_lookback_blocks: default_initial_lookback_blocks(),
                gas_limit: default_gas_limit(),
                receipt_timeout_ms: default_receipt_timeout_ms(),
                private_key_env: default_evm_private_key_env(),
            },
            svm: SvmChainConfig {
                name: "Solana Devnet".to_string(),
                rpc_url: "https://api.devnet.solana.com".to_string(),
                program_id: "8X3gPhhqv562jvPgK7Yj7VWwSjYjcsxUuedJKcic8Pwf".to_string(),
                token_mint: "4QLR9Eu76BqdqqgLgK57ZNrTmUd9Fd8QYcqRFWWducUH".to_string(),
                signature_page_limit: default_signature_page_limit(),
                private_key_env: default_svm_private_key_env(),
            },
            relayer: RelayerConfig::default(),
            ledger: LedgerConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

/// Validates a `0x`-prefixed 20-byte EVM address.
fn validate_evm_address(addr: &str) -> anyhow::Result<()> {
    let stripped = addr
        .strip_prefix("0x")
        .ok_or_else(|| anyhow::anyhow!("EVM address must be 0x-prefixed hex string"))?;
    let bytes = hex::decode(stripped).map_err(|_| anyhow::anyhow!("Invalid hex address"))?;
    if bytes.len() != 20 {
        anyhow::bail!("Invalid EVM address length: expected 20 bytes, got {}", bytes.len());
    }
    Ok(())
}
