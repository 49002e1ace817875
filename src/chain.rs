//! Chain Adapter Module
//!
//! Defines the capability set every chain adapter exposes to the relay loops:
//! query the chain head, fetch burn events inside a scan window, and mint on
//! this chain to complete a transfer coming from the other one.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Placeholder written into both address fields of a burn event whose payload
/// could not be decoded.
pub const SENTINEL_ERROR: &str = "error";

// ============================================================================
// CHAIN IDENTITY
// ============================================================================

/// The two chains a bridge deployment connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Ethereum,
    Solana,
}

impl ChainKind {
    /// Stable identifier used in storage, logs and on-chain payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKind::Ethereum => "ethereum",
            ChainKind::Solana => "solana",
        }
    }

    /// The chain on the other side of the bridge.
    pub fn counterpart(&self) -> ChainKind {
        match self {
            ChainKind::Ethereum => ChainKind::Solana,
            ChainKind::Solana => ChainKind::Ethereum,
        }
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ethereum" => Ok(ChainKind::Ethereum),
            "solana" => Ok(ChainKind::Solana),
            other => Err(anyhow::anyhow!("Unknown chain '{}'", other)),
        }
    }
}

// ============================================================================
// SCAN POSITIONS
// ============================================================================

/// A scan watermark: block height on EVM, transaction signature on Solana.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChainPosition {
    Block(u64),
    Signature(String),
}

/// The range a single ingestion cycle asks an adapter to scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanWindow {
    /// Closed block range `[from, to]`.
    Blocks { from: u64, to: u64 },
    /// Everything newer than the given signature, or the most recent page when `None`.
    SinceSignature(Option<String>),
}

// ============================================================================
// BURN EVENTS
// ============================================================================

/// A burn observed on the source chain, ready to become a pending transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnEvent {
    /// Burner address on the source chain
    pub source_address: String,
    /// Burned amount in base units, as a decimal string
    pub amount: String,
    /// Recipient address on the destination chain
    pub destination_address: String,
    /// Source transaction hash (EVM) or signature (Solana); the transfer's natural key
    pub source_tx_hash: String,
    /// Block containing the burn (EVM only)
    pub block_number: Option<u64>,
}

impl BurnEvent {
    /// Event returned for a burn whose payload could not be decoded.
    pub fn sentinel(source_tx_hash: &str) -> Self {
        Self {
            source_address: SENTINEL_ERROR.to_string(),
            amount: "0".to_string(),
            destination_address: SENTINEL_ERROR.to_string(),
            source_tx_hash: source_tx_hash.to_string(),
            block_number: None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.source_address == SENTINEL_ERROR || self.destination_address == SENTINEL_ERROR
    }
}

/// Result of one `fetch_burn_events` call.
#[derive(Debug, Clone, Default)]
pub struct BurnBatch {
    /// Burn events in chain order, oldest first
    pub events: Vec<BurnEvent>,
    /// Position the cursor may advance to once every event above is recorded.
    /// `None` when nothing new was scanned.
    pub newest_position: Option<ChainPosition>,
}

// ============================================================================
// ADAPTER TRAIT
// ============================================================================

/// Uniform capability set implemented by the EVM and Solana adapters.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Which chain this adapter talks to.
    fn kind(&self) -> ChainKind;

    /// Address of the bridged token on this chain (ERC-20 contract or SPL mint).
    fn token_address(&self) -> String;

    /// Current chain head height, or `None` for chains scanned by signature.
    async fn current_position(&self) -> Result<Option<u64>>;

    /// Fetches burn events inside `window`, oldest first.
    async fn fetch_burn_events(&self, window: &ScanWindow) -> Result<BurnBatch>;

    /// Mints `amount` to `recipient` on this chain and waits for the configured
    /// confirmation depth.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Destination transaction hash or signature
    /// * `Err(anyhow::Error)` - Submission, simulation or confirmation failure
    async fn mint(&self, recipient: &str, amount: &str, source_tx_hash: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_kind_round_trip() {
        for kind in [ChainKind::Ethereum, ChainKind::Solana] {
            assert_eq!(kind.as_str().parse::<ChainKind>().unwrap(), kind);
            assert_eq!(kind.counterpart().counterpart(), kind);
        }
        assert!("sepolia".parse::<ChainKind>().is_err());
    }

    /// Why: ingestion relies on sentinel detection to drop undecodable burns
    #[test]
    fn test_sentinel_detection() {
        let sentinel = BurnEvent::sentinel("sig");
        assert!(sentinel.is_sentinel());
        assert_eq!(sentinel.source_tx_hash, "sig");

        let ok = BurnEvent {
            source_address: "a".into(),
            amount: "1".into(),
            destination_address: "b".into(),
            source_tx_hash: "sig".into(),
            block_number: None,
        };
        assert!(!ok.is_sentinel());
    }
}
