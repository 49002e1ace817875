//! Shared test helpers for unit tests
//!
//! This module provides helper functions used by unit tests.
//!
//! The module is organized into several categories:
//! - **Constants**: Dummy addresses, hashes, signatures and keys
//! - **Configuration Builders**: Functions to create test configurations
//! - **Ledger Helpers**: In-memory ledger and transfer builders
//! - **Mock Chain Adapter**: Scripted `ChainAdapter` for relay loop tests

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use bridge_relayer::chain::{
    BurnBatch, BurnEvent, ChainAdapter, ChainKind, ChainPosition, ScanWindow,
};
use bridge_relayer::config::{
    ApiConfig, Config, EvmChainConfig, LedgerConfig, RelayerConfig, SvmChainConfig,
};
use bridge_relayer::ledger::{Ledger, NewTransfer};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

// ============================================================================
// CONSTANTS
// ============================================================================

// -------------------------------- USERS ---------------------------------

/// Dummy user address (EVM format, 20 bytes, EIP-55 checksummed)
pub const DUMMY_EVM_ADDR: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

/// Dummy user address (Solana, base58 pubkey)
pub const DUMMY_SVM_ADDR: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";

// ------------------------- TOKENS AND PROGRAMS --------------------------

/// Dummy bridged token contract (EVM format, 20 bytes)
pub const DUMMY_EVM_TOKEN_ADDR: &str = "0xE6a10059f1206aCf2925Bbcc7dECD54AbD6DeFd1";

/// Dummy bridge program id (valid base58 pubkey string)
pub const DUMMY_SVM_PROGRAM_ID: &str = "8X3gPhhqv562jvPgK7Yj7VWwSjYjcsxUuedJKcic8Pwf";

/// Dummy SPL mint of the bridged token (valid base58 pubkey string)
pub const DUMMY_SVM_TOKEN_MINT: &str = "4QLR9Eu76BqdqqgLgK57ZNrTmUd9Fd8QYcqRFWWducUH";

// -------------------------------- OTHER ---------------------------------

/// Dummy EVM transaction hash (64 hex characters)
pub const DUMMY_TX_HASH: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000012";

/// Dummy Solana signatures, newest first as returned by `getSignaturesForAddress`
pub const DUMMY_SVM_SIGNATURE_1: &str =
    "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW";
pub const DUMMY_SVM_SIGNATURE_2: &str =
    "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T4fNV3YYqB4HBKyJ5pyYQNvHzS8BD4tFQGMKfiXa4oUaD";
pub const DUMMY_SVM_SIGNATURE_3: &str =
    "3pHm2j3U7c3JXuHjd3v7sAupuGvGkYDeXwjRn6rkuBnUMXqNxH3o1cYvGAhq6vPTVbr5xGWk7xV5hX1TcTnbEWrY";

/// Hardhat account #0 private key (hex), derives [`DUMMY_EVM_ADDR`]
pub const TEST_EVM_PRIVATE_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

// ============================================================================
// CONFIGURATION BUILDERS
// ============================================================================

/// Build a valid in-memory test configuration with unreachable RPC endpoints.
pub fn build_test_config() -> Config {
    build_test_config_with_mock_servers("http://127.0.0.1:18545", "http://127.0.0.1:18899")
}

/// Build a test configuration pointing both chains at the given mock servers.
///
/// Keys are set as environment variables under unique names per invocation
/// to avoid parallel test conflicts. Retry delays are shortened to keep
/// rate-limit tests fast.
pub fn build_test_config_with_mock_servers(evm_rpc_url: &str, svm_rpc_url: &str) -> Config {
    let mut rng = rand::thread_rng();
    let unique_id: u64 = rng.gen();
    let evm_key_env = format!("TEST_EVM_PRIVATE_KEY_{}", unique_id);
    let svm_key_env = format!("TEST_SVM_PRIVATE_KEY_{}", unique_id);

    let seed: [u8; 32] = rng.gen();
    std::env::set_var(&evm_key_env, TEST_EVM_PRIVATE_KEY);
    std::env::set_var(&svm_key_env, format!("{:?}", seed.to_vec()));

    Config {
        evm: EvmChainConfig {
            name: "Test EVM".to_string(),
            rpc_url: evm_rpc_url.to_string(),
            chain_id: 31337,
            token_addr: DUMMY_EVM_TOKEN_ADDR.to_string(),
            bridge_addr: None,
            confirmations: 2,
            initial_lookback_blocks: 1000,
            gas_limit: 200_000,
            receipt_timeout_ms: 2_000,
            private_key_env: evm_key_env,
        },
        svm: SvmChainConfig {
            name: "Test SVM".to_string(),
            rpc_url: svm_rpc_url.to_string(),
            program_id: DUMMY_SVM_PROGRAM_ID.to_string(),
            token_mint: DUMMY_SVM_TOKEN_MINT.to_string(),
            signature_page_limit: 100,
            private_key_env: svm_key_env,
        },
        relayer: RelayerConfig {
            polling_interval_ms: 50,
            processing_interval_ms: 50,
            max_retries: 5,
            retry_failed: true,
            rate_limit_max_retries: 3,
            rate_limit_initial_delay_ms: 1,
        },
        ledger: LedgerConfig {
            path: ":memory:".to_string(),
        },
        api: ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
        },
    }
}

// ============================================================================
// LEDGER HELPERS
// ============================================================================

/// Fresh in-memory ledger with the schema applied.
pub fn create_test_ledger() -> Ledger {
    let ledger = Ledger::open_in_memory().expect("open in-memory ledger");
    ledger.migrate().expect("migrate ledger");
    ledger
}

/// Burn event with the given natural key, sent to the default recipient of
/// the counterpart chain.
pub fn burn_event(source_tx_hash: &str, amount: &str, destination_address: &str) -> BurnEvent {
    BurnEvent {
        source_address: DUMMY_EVM_ADDR.to_string(),
        amount: amount.to_string(),
        destination_address: destination_address.to_string(),
        source_tx_hash: source_tx_hash.to_string(),
        block_number: None,
    }
}

/// Pending EVM -> Solana transfer ready for `Ledger::insert_pending`.
pub fn new_transfer(source_tx_hash: &str) -> NewTransfer {
    NewTransfer::from_burn(
        &burn_event(source_tx_hash, "1000", DUMMY_SVM_ADDR),
        ChainKind::Ethereum,
        DUMMY_EVM_TOKEN_ADDR,
        DUMMY_SVM_TOKEN_MINT,
    )
}

// ============================================================================
// MOCK CHAIN ADAPTER
// ============================================================================

/// Scripted chain adapter.
///
/// Block-height chains report `head` and return every event whose
/// `block_number` lies in the window (or all events without one); the batch
/// position is the window's upper bound. Signature chains report no head and
/// return all events with `newest_signature` as the batch position.
pub struct MockChainAdapter {
    kind: ChainKind,
    token_address: String,
    pub head: Mutex<Option<u64>>,
    pub events: Mutex<Vec<BurnEvent>>,
    pub newest_signature: Mutex<Option<String>>,
    pub fail_queries: AtomicBool,
    pub mint_results: Mutex<VecDeque<Result<String, String>>>,
    pub windows: Mutex<Vec<ScanWindow>>,
    pub mints: Mutex<Vec<(String, String, String)>>,
    scan_gate: Mutex<Option<Arc<Notify>>>,
    mint_gate: Mutex<Option<Arc<Notify>>>,
    mint_counter: AtomicU32,
}

impl MockChainAdapter {
    pub fn evm(head: u64) -> Self {
        Self::new(ChainKind::Ethereum, DUMMY_EVM_TOKEN_ADDR, Some(head))
    }

    pub fn solana() -> Self {
        Self::new(ChainKind::Solana, DUMMY_SVM_TOKEN_MINT, None)
    }

    fn new(kind: ChainKind, token_address: &str, head: Option<u64>) -> Self {
        Self {
            kind,
            token_address: token_address.to_string(),
            head: Mutex::new(head),
            events: Mutex::new(Vec::new()),
            newest_signature: Mutex::new(None),
            fail_queries: AtomicBool::new(false),
            mint_results: Mutex::new(VecDeque::new()),
            windows: Mutex::new(Vec::new()),
            mints: Mutex::new(Vec::new()),
            scan_gate: Mutex::new(None),
            mint_gate: Mutex::new(None),
            mint_counter: AtomicU32::new(0),
        }
    }

    pub fn set_head(&self, head: u64) {
        *self.head.lock().unwrap() = Some(head);
    }

    pub fn set_events(&self, events: Vec<BurnEvent>) {
        *self.events.lock().unwrap() = events;
    }

    pub fn set_newest_signature(&self, signature: &str) {
        *self.newest_signature.lock().unwrap() = Some(signature.to_string());
    }

    /// Queues the outcome of the next mint; unscripted mints succeed.
    pub fn push_mint_result(&self, result: Result<&str, &str>) {
        self.mint_results
            .lock()
            .unwrap()
            .push_back(result.map(str::to_string).map_err(str::to_string));
    }

    /// Makes every burn scan wait for a permit on `gate` after it is recorded.
    pub fn hold_scans(&self, gate: Arc<Notify>) {
        *self.scan_gate.lock().unwrap() = Some(gate);
    }

    /// Makes every mint wait for a permit on `gate` after it is recorded.
    pub fn hold_mints(&self, gate: Arc<Notify>) {
        *self.mint_gate.lock().unwrap() = Some(gate);
    }

    pub fn windows(&self) -> Vec<ScanWindow> {
        self.windows.lock().unwrap().clone()
    }

    pub fn mint_calls(&self) -> Vec<(String, String, String)> {
        self.mints.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
    fn kind(&self) -> ChainKind {
        self.kind
    }

    fn token_address(&self) -> String {
        self.token_address.clone()
    }

    async fn current_position(&self) -> Result<Option<u64>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            anyhow::bail!("mock RPC unavailable");
        }
        Ok(*self.head.lock().unwrap())
    }

    async fn fetch_burn_events(&self, window: &ScanWindow) -> Result<BurnBatch> {
        if self.fail_queries.load(Ordering::SeqCst) {
            anyhow::bail!("mock RPC unavailable");
        }
        self.windows.lock().unwrap().push(window.clone());
        let gate = self.scan_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let events = self.events.lock().unwrap().clone();

        Ok(match window {
            ScanWindow::Blocks { from, to } => BurnBatch {
                events: events
                    .into_iter()
                    .filter(|e| e.block_number.map_or(true, |b| b >= *from && b <= *to))
                    .collect(),
                newest_position: Some(ChainPosition::Block(*to)),
            },
            ScanWindow::SinceSignature(_) => BurnBatch {
                events,
                newest_position: self
                    .newest_signature
                    .lock()
                    .unwrap()
                    .clone()
                    .map(ChainPosition::Signature),
            },
        })
    }

    async fn mint(&self, recipient: &str, amount: &str, source_tx_hash: &str) -> Result<String> {
        self.mints.lock().unwrap().push((
            recipient.to_string(),
            amount.to_string(),
            source_tx_hash.to_string(),
        ));
        let gate = self.mint_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let scripted = self.mint_results.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(hash)) => Ok(hash),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => {
                let n = self.mint_counter.fetch_add(1, Ordering::SeqCst);
                Ok(format!("mint-{}-{}", self.kind, n))
            }
        }
    }
}
