//! Token Bridge Relayer Library
//!
//! This crate relays burn-and-mint token transfers between an EVM chain and
//! Solana. It watches burns on each chain, records them in a durable ledger and
//! mints the matching amount on the counterpart chain.

pub mod api;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod evm_client;
pub mod ledger;
pub mod relay;
pub mod retry;
pub mod rpc;
pub mod svm_client;

// Re-export commonly used types
pub use chain::{BurnBatch, BurnEvent, ChainAdapter, ChainKind, ChainPosition, ScanWindow};
pub use config::{ApiConfig, Config, EvmChainConfig, LedgerConfig, RelayerConfig, SvmChainConfig};
pub use ledger::{Ledger, Transfer, TransferStatus};
pub use relay::Relayer;
pub use retry::RetryPolicy;
