//! Solana SVM Client Module
//!
//! Detects `BurnForBridge` instructions of the bridge program by walking its
//! transaction signatures, and completes EVM -> Solana transfers by submitting
//! the program's `complete_transfer` instruction.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::Deserialize;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::Transaction,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chain::{BurnBatch, BurnEvent, ChainAdapter, ChainKind, ChainPosition, ScanWindow};
use crate::config::SvmChainConfig;
use crate::retry::RetryPolicy;
use crate::rpc::JsonRpcClient;

// Well-known program IDs from Solana mainnet/devnet docs.
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
pub const ASSOCIATED_TOKEN_PROGRAM_ID: &str = "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL";
pub const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";

/// Seed of the bridge state PDA.
pub const BRIDGE_SEED: &[u8] = b"flappy_bridge";

/// Anchor discriminator of `complete_transfer`.
pub const COMPLETE_TRANSFER_DISCRIMINATOR: [u8; 8] = [98, 39, 123, 229, 202, 12, 82, 182];

/// Log line emitted by the bridge program for a burn.
pub const BURN_INSTRUCTION_LOG: &str = "Instruction: BurnForBridge";

const PROGRAM_DATA_PREFIX: &str = "Program data:";

// ============================================================================
// ON-CHAIN PAYLOADS
// ============================================================================

/// Event payload emitted after the 8-byte event discriminator.
#[derive(BorshDeserialize, BorshSerialize, Debug, Clone, PartialEq, Eq)]
pub struct BurnEventData {
    pub from: [u8; 32],
    pub destination: String,
    pub amount: u64,
}

/// Arguments of `complete_transfer`, serialized after the discriminator.
#[derive(BorshDeserialize, BorshSerialize, Debug, Clone, PartialEq, Eq)]
pub struct CompleteTransferArgs {
    pub recipient: [u8; 32],
    pub amount: u64,
    pub source_chain: String,
    pub source_tx_hash: String,
}

// ============================================================================
// JSON-RPC TYPES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    #[serde(default)]
    pub err: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMeta {
    #[serde(default)]
    err: Option<serde_json::Value>,
    #[serde(default)]
    log_messages: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct TransactionResult {
    meta: Option<TransactionMeta>,
}

// ============================================================================
// CLIENT
// ============================================================================

/// Client for the Solana bridge program.
pub struct SvmClient {
    rpc: JsonRpcClient,
    rpc_client: RpcClient,
    program_id: Pubkey,
    token_mint: Pubkey,
    page_limit: usize,
    retry: RetryPolicy,
    keypair: Option<Arc<Keypair>>,
}

impl SvmClient {
    /// Creates a read-only client. Attach a keypair with [`SvmClient::with_keypair`]
    /// before minting.
    pub fn new(config: &SvmChainConfig, retry: RetryPolicy) -> Result<Self> {
        let program_id = Pubkey::from_str(&config.program_id)
            .context("Invalid SVM program_id (expected base58 string)")?;
        let token_mint = Pubkey::from_str(&config.token_mint)
            .context("Invalid SVM token_mint (expected base58 string)")?;

        let rpc_client =
            RpcClient::new_with_commitment(config.rpc_url.clone(), CommitmentConfig::confirmed());

        Ok(Self {
            rpc: JsonRpcClient::new(&config.rpc_url, retry)?,
            rpc_client,
            program_id,
            token_mint,
            page_limit: config.signature_page_limit,
            retry,
            keypair: None,
        })
    }

    pub fn with_keypair(mut self, keypair: Keypair) -> Self {
        self.keypair = Some(Arc::new(keypair));
        self
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    pub fn bridge_pda(&self) -> Pubkey {
        Pubkey::find_program_address(&[BRIDGE_SEED], &self.program_id).0
    }

    /// One page of program signatures, newest first.
    pub async fn get_signatures_for_address(
        &self,
        until: Option<&str>,
        before: Option<&str>,
    ) -> Result<Vec<SignatureInfo>> {
        let mut options = serde_json::json!({
            "limit": self.page_limit,
            "commitment": "confirmed",
        });
        if let Some(until) = until {
            options["until"] = serde_json::json!(until);
        }
        if let Some(before) = before {
            options["before"] = serde_json::json!(before);
        }

        self.rpc
            .call(
                "getSignaturesForAddress",
                serde_json::json!([self.program_id.to_string(), options]),
            )
            .await
            .context("getSignaturesForAddress failed")
    }

    /// All program signatures newer than `until`, newest first.
    ///
    /// Pages backward with `before` until a short page shows the cursor was
    /// reached. Without `until` only the most recent page is returned.
    pub async fn list_new_signatures(&self, until: Option<&str>) -> Result<Vec<SignatureInfo>> {
        let mut all: Vec<SignatureInfo> = Vec::new();

        loop {
            let before = all.last().map(|s| s.signature.clone());
            let batch = self
                .get_signatures_for_address(until, before.as_deref())
                .await?;
            let full_page = batch.len() >= self.page_limit;
            all.extend(batch);

            if until.is_none() || !full_page {
                return Ok(all);
            }
            debug!("Paging Solana signatures, {} collected so far", all.len());
        }
    }

    /// Log messages of a confirmed transaction.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(logs))` - Transaction found and succeeded
    /// * `Ok(None)` - Transaction failed on-chain
    /// * `Err(anyhow::Error)` - RPC failure, or the node has not indexed the
    ///   transaction yet
    pub async fn get_transaction_logs(&self, signature: &str) -> Result<Option<Vec<String>>> {
        let tx: Option<TransactionResult> = self
            .rpc
            .call(
                "getTransaction",
                serde_json::json!([
                    signature,
                    {
                        "encoding": "json",
                        "commitment": "confirmed",
                        "maxSupportedTransactionVersion": 0
                    }
                ]),
            )
            .await
            .with_context(|| format!("getTransaction failed for {}", signature))?;

        let Some(tx) = tx else {
            anyhow::bail!("Solana transaction {} not available from RPC node yet", signature);
        };
        let Some(meta) = tx.meta else {
            anyhow::bail!("Solana transaction {} returned without status meta", signature);
        };
        if meta.err.is_some() {
            return Ok(None);
        }
        Ok(Some(meta.log_messages.unwrap_or_default()))
    }

    /// Burn events in program signatures newer than `until`, oldest first.
    ///
    /// Fails as a whole if any listed transaction cannot be fetched, so the
    /// caller keeps its cursor and rescans the same signatures next cycle.
    pub async fn get_burn_events(&self, until: Option<&str>) -> Result<BurnBatch> {
        let signatures = self.list_new_signatures(until).await?;
        let newest_position = signatures
            .first()
            .map(|s| ChainPosition::Signature(s.signature.clone()));

        let mut events = Vec::new();
        for info in signatures.iter().rev() {
            if info.err.is_some() {
                continue;
            }
            let Some(logs) = self.get_transaction_logs(&info.signature).await? else {
                debug!("Skipping failed Solana tx {}", info.signature);
                continue;
            };
            if is_burn_transaction(&logs) {
                events.push(parse_burn_event(&logs, &info.signature));
            }
        }

        Ok(BurnBatch {
            events,
            newest_position,
        })
    }

    /// Mints `amount` to `recipient` through `complete_transfer` and waits for
    /// confirmation.
    ///
    /// Creates the recipient's associated token account first when missing.
    /// The transaction is signed once and only its submission is retried, so
    /// every attempt carries the same signature.
    pub async fn mint(&self, recipient: &str, amount: &str, source_tx_hash: &str) -> Result<String> {
        let keypair = self
            .keypair
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Solana keypair not configured"))?;
        let recipient = Pubkey::from_str(recipient)
            .with_context(|| format!("Invalid Solana recipient '{}'", recipient))?;
        let amount: u64 = amount
            .parse()
            .with_context(|| format!("Invalid Solana mint amount '{}'", amount))?;

        let recipient_ata = get_associated_token_address(&recipient, &self.token_mint)?;
        let rpc_client = &self.rpc_client;
        let ata_exists = self
            .retry
            .run("getAccountInfo", || async move {
                rpc_client
                    .get_account_with_commitment(&recipient_ata, CommitmentConfig::confirmed())
                    .await
                    .map(|response| response.value.is_some())
                    .context("Failed to query recipient token account")
            })
            .await?;
        if !ata_exists {
            info!("Creating token account {} for recipient {}", recipient_ata, recipient);
        }

        let instructions = build_mint_instructions(
            &self.program_id,
            &self.token_mint,
            &keypair.pubkey(),
            &recipient,
            amount,
            source_tx_hash,
            !ata_exists,
        )?;

        let blockhash = self
            .retry
            .run("getLatestBlockhash", || async move {
                rpc_client
                    .get_latest_blockhash()
                    .await
                    .context("Failed to get latest blockhash")
            })
            .await?;
        let signer: &Keypair = keypair;
        let tx = Transaction::new_signed_with_payer(
            &instructions,
            Some(&signer.pubkey()),
            &[signer],
            blockhash,
        );

        let tx = &tx;
        let signature = self
            .retry
            .run("sendAndConfirmTransaction", || async move {
                rpc_client
                    .send_and_confirm_transaction(tx)
                    .await
                    .context("Failed to send complete_transfer transaction")
            })
            .await?;

        Ok(signature.to_string())
    }
}

#[async_trait]
impl ChainAdapter for SvmClient {
    fn kind(&self) -> ChainKind {
        ChainKind::Solana
    }

    fn token_address(&self) -> String {
        self.token_mint.to_string()
    }

    async fn current_position(&self) -> Result<Option<u64>> {
        Ok(None)
    }

    async fn fetch_burn_events(&self, window: &ScanWindow) -> Result<BurnBatch> {
        let ScanWindow::SinceSignature(until) = window else {
            anyhow::bail!("Solana is scanned by signature, got {:?}", window);
        };
        self.get_burn_events(until.as_deref()).await
    }

    async fn mint(&self, recipient: &str, amount: &str, source_tx_hash: &str) -> Result<String> {
        SvmClient::mint(self, recipient, amount, source_tx_hash).await
    }
}

// ============================================================================
// LOG PARSING
// ============================================================================

/// True if any log line marks a `BurnForBridge` instruction.
pub fn is_burn_transaction(logs: &[String]) -> bool {
    logs.iter().any(|log| log.contains(BURN_INSTRUCTION_LOG))
}

/// Decodes the burn payload from the first `Program data:` log line.
///
/// Returns the sentinel event when the payload is missing or malformed.
pub fn parse_burn_event(logs: &[String], signature: &str) -> BurnEvent {
    match decode_burn_payload(logs) {
        Ok(data) => BurnEvent {
            source_address: Pubkey::new_from_array(data.from).to_string(),
            amount: data.amount.to_string(),
            destination_address: data.destination,
            source_tx_hash: signature.to_string(),
            block_number: None,
        },
        Err(e) => {
            warn!("Failed to parse burn event in {}: {:#}", signature, e);
            BurnEvent::sentinel(signature)
        }
    }
}

fn decode_burn_payload(logs: &[String]) -> Result<BurnEventData> {
    let data_log = logs
        .iter()
        .find(|log| log.contains(PROGRAM_DATA_PREFIX))
        .ok_or_else(|| anyhow::anyhow!("No program data found in transaction logs"))?;
    let encoded = data_log
        .split_once(PROGRAM_DATA_PREFIX)
        .map(|(_, rest)| rest.trim())
        .unwrap_or_default();

    let bytes = STANDARD
        .decode(encoded)
        .context("Program data is not valid base64")?;
    if bytes.len() < 8 {
        anyhow::bail!("Program data too short: {} bytes", bytes.len());
    }

    BurnEventData::deserialize(&mut &bytes[8..]).context("Failed to decode burn event payload")
}

// ============================================================================
// INSTRUCTION BUILDING
// ============================================================================

/// Builds the instructions of a mint transaction: an optional idempotent ATA
/// creation followed by `complete_transfer`.
pub fn build_mint_instructions(
    program_id: &Pubkey,
    token_mint: &Pubkey,
    authority: &Pubkey,
    recipient: &Pubkey,
    amount: u64,
    source_tx_hash: &str,
    create_recipient_ata: bool,
) -> Result<Vec<Instruction>> {
    let bridge_pda = Pubkey::find_program_address(&[BRIDGE_SEED], program_id).0;
    let authority_ata = get_associated_token_address(authority, token_mint)?;
    let recipient_ata = get_associated_token_address(recipient, token_mint)?;

    let args = CompleteTransferArgs {
        recipient: recipient.to_bytes(),
        amount,
        source_chain: ChainKind::Ethereum.as_str().to_string(),
        source_tx_hash: source_tx_hash.to_string(),
    };
    let mut data = COMPLETE_TRANSFER_DISCRIMINATOR.to_vec();
    args.serialize(&mut data)
        .context("Failed to serialize complete_transfer args")?;

    let complete_transfer = Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(bridge_pda, false),
            AccountMeta::new_readonly(*token_mint, false),
            AccountMeta::new(authority_ata, false),
            AccountMeta::new(recipient_ata, false),
            AccountMeta::new_readonly(*recipient, false),
            AccountMeta::new(*authority, true),
            AccountMeta::new_readonly(well_known_program_id(TOKEN_PROGRAM_ID)?, false),
            AccountMeta::new_readonly(well_known_program_id(ASSOCIATED_TOKEN_PROGRAM_ID)?, false),
            AccountMeta::new_readonly(well_known_program_id(SYSTEM_PROGRAM_ID)?, false),
        ],
        data,
    };

    let mut instructions = Vec::with_capacity(2);
    if create_recipient_ata {
        instructions.push(create_associated_token_account_idempotent(
            authority, recipient, token_mint,
        )?);
    }
    instructions.push(complete_transfer);
    Ok(instructions)
}

/// Derives the associated token account (ATA) for an owner and mint.
pub fn get_associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Result<Pubkey> {
    let token_program = well_known_program_id(TOKEN_PROGRAM_ID)?;
    let ata_program = well_known_program_id(ASSOCIATED_TOKEN_PROGRAM_ID)?;
    Ok(Pubkey::find_program_address(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        &ata_program,
    )
    .0)
}

/// Builds a CreateIdempotent associated token account instruction.
fn create_associated_token_account_idempotent(
    payer: &Pubkey,
    owner: &Pubkey,
    mint: &Pubkey,
) -> Result<Instruction> {
    let ata = get_associated_token_address(owner, mint)?;

    Ok(Instruction {
        program_id: well_known_program_id(ASSOCIATED_TOKEN_PROGRAM_ID)?,
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(ata, false),
            AccountMeta::new_readonly(*owner, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(well_known_program_id(SYSTEM_PROGRAM_ID)?, false),
            AccountMeta::new_readonly(well_known_program_id(TOKEN_PROGRAM_ID)?, false),
        ],
        data: vec![1],
    })
}

fn well_known_program_id(id: &str) -> Result<Pubkey> {
    Pubkey::from_str(id).with_context(|| format!("Invalid program id constant {}", id))
}
