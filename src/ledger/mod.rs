//! Transfer ledger
//!
//! SQLite store for bridge transfers and per-chain scan cursors. Every read
//! goes to the database; nothing is cached in memory.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::warn;

use crate::chain::{BurnEvent, ChainKind, ChainPosition};

/// Default page size of transfer listings.
pub const DEFAULT_QUERY_LIMIT: usize = 20;

const TRANSFER_COLUMNS: &str = "id, source_chain, destination_chain, source_token_address, \
     destination_token_address, amount, source_address, destination_address, source_tx_hash, \
     destination_tx_hash, status, retry_count, error_message, created_at, updated_at, processed_at";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to prepare ledger directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("Ledger lock poisoned")]
    LockPoisoned,
    #[error("Invalid {field} value in ledger: '{value}'")]
    InvalidValue { field: &'static str, value: String },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

// ============================================================================
// RECORD TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Processing => "processing",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "processing" => Ok(TransferStatus::Processing),
            "completed" => Ok(TransferStatus::Completed),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(LedgerError::InvalidValue {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// A bridge transfer as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: String,
    pub source_chain: ChainKind,
    pub destination_chain: ChainKind,
    pub source_token_address: String,
    pub destination_token_address: String,
    /// Base units as a decimal string
    pub amount: String,
    pub source_address: String,
    pub destination_address: String,
    pub source_tx_hash: String,
    pub destination_tx_hash: Option<String>,
    pub status: TransferStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Fields of a transfer known at detection time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub source_chain: ChainKind,
    pub destination_chain: ChainKind,
    pub source_token_address: String,
    pub destination_token_address: String,
    pub amount: String,
    pub source_address: String,
    pub destination_address: String,
    pub source_tx_hash: String,
}

impl NewTransfer {
    pub fn from_burn(
        event: &BurnEvent,
        source_chain: ChainKind,
        source_token_address: &str,
        destination_token_address: &str,
    ) -> Self {
        Self {
            source_chain,
            destination_chain: source_chain.counterpart(),
            source_token_address: source_token_address.to_string(),
            destination_token_address: destination_token_address.to_string(),
            amount: event.amount.clone(),
            source_address: event.source_address.clone(),
            destination_address: event.destination_address.clone(),
            source_tx_hash: event.source_tx_hash.clone(),
        }
    }
}

/// Per-chain scan watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainCursor {
    pub chain: ChainKind,
    pub last_processed_block: Option<u64>,
    pub last_processed_signature: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Filter for transfer listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferQuery {
    pub status: Option<TransferStatus>,
    pub source_chain: Option<ChainKind>,
    pub limit: usize,
}

impl Default for TransferQuery {
    fn default() -> Self {
        Self {
            status: None,
            source_chain: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

// ============================================================================
// LEDGER
// ============================================================================

/// Thread-safe handle to the ledger database.
#[derive(Clone)]
pub struct Ledger {
    conn: Arc<Mutex<Connection>>,
}

impl Ledger {
    /// Opens or creates the database file, creating its directory if needed.
    pub fn open(path: &str) -> LedgerResult<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates tables and indexes. Safe to run on every startup.
    pub fn migrate(&self) -> LedgerResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS transfers (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                source_chain TEXT NOT NULL,
                destination_chain TEXT NOT NULL,
                source_token_address TEXT NOT NULL,
                destination_token_address TEXT NOT NULL,
                amount TEXT NOT NULL,
                source_address TEXT NOT NULL,
                destination_address TEXT NOT NULL,
                source_tx_hash TEXT NOT NULL,
                destination_tx_hash TEXT,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                processed_at INTEGER
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_transfers_source_tx ON transfers(source_tx_hash);
            CREATE INDEX IF NOT EXISTS idx_transfers_status ON transfers(status);
            CREATE INDEX IF NOT EXISTS idx_transfers_source_status ON transfers(source_chain, status);

            CREATE TABLE IF NOT EXISTS chain_status (
                chain TEXT PRIMARY KEY,
                last_processed_block INTEGER,
                last_processed_signature TEXT,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    /// Closes the connection if this is the last handle.
    pub fn close(self) -> LedgerResult<()> {
        match Arc::try_unwrap(self.conn) {
            Ok(mutex) => {
                let conn = mutex.into_inner().map_err(|_| LedgerError::LockPoisoned)?;
                conn.close().map_err(|(_, e)| LedgerError::Sqlite(e))
            }
            Err(_) => {
                warn!("Ledger still shared at close; connection closes with the last handle");
                Ok(())
            }
        }
    }

    pub fn find_by_source_tx_hash(&self, source_tx_hash: &str) -> LedgerResult<Option<Transfer>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM transfers WHERE source_tx_hash = ?1", TRANSFER_COLUMNS);

        let raw = conn
            .query_row(&sql, params![source_tx_hash], RawTransfer::from_row)
            .optional()?;
        raw.map(RawTransfer::into_transfer).transpose()
    }

    /// Inserts a pending transfer.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Row inserted
    /// * `Ok(false)` - A transfer with the same source transaction hash already exists
    pub fn insert_pending(&self, transfer: &NewTransfer) -> LedgerResult<bool> {
        let conn = self.lock()?;
        let now = Utc::now().timestamp_millis();

        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO transfers (
                id, source_chain, destination_chain, source_token_address,
                destination_token_address, amount, source_address, destination_address,
                source_tx_hash, status, retry_count, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?11)
            "#,
            params![
                uuid::Uuid::new_v4().to_string(),
                transfer.source_chain.as_str(),
                transfer.destination_chain.as_str(),
                transfer.source_token_address,
                transfer.destination_token_address,
                transfer.amount,
                transfer.source_address,
                transfer.destination_address,
                transfer.source_tx_hash,
                TransferStatus::Pending.as_str(),
                now,
            ],
        )?;

        Ok(inserted == 1)
    }

    /// Transfers awaiting settlement for one direction, in insertion order.
    ///
    /// Selects `pending` rows, plus `failed` rows when `include_failed` is set,
    /// whose retry count is below `retry_ceiling`.
    pub fn list_pending_for(
        &self,
        source_chain: ChainKind,
        destination_chain: ChainKind,
        retry_ceiling: u32,
        include_failed: bool,
    ) -> LedgerResult<Vec<Transfer>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM transfers \
             WHERE source_chain = ?1 AND destination_chain = ?2 \
               AND (status = ?3 OR (?4 AND status = ?5)) \
               AND retry_count < ?6 \
             ORDER BY seq ASC",
            TRANSFER_COLUMNS
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![
                    source_chain.as_str(),
                    destination_chain.as_str(),
                    TransferStatus::Pending.as_str(),
                    include_failed,
                    TransferStatus::Failed.as_str(),
                    retry_ceiling,
                ],
                RawTransfer::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawTransfer::into_transfer).collect()
    }

    /// Newest-first listing filtered by status and source chain.
    pub fn list(&self, query: &TransferQuery) -> LedgerResult<Vec<Transfer>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM transfers \
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR source_chain = ?2) \
             ORDER BY created_at DESC, seq DESC \
             LIMIT ?3",
            TRANSFER_COLUMNS
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![
                    query.status.map(|s| s.as_str()),
                    query.source_chain.map(|c| c.as_str()),
                    query.limit as i64,
                ],
                RawTransfer::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawTransfer::into_transfer).collect()
    }

    /// Claims a transfer for settlement. Returns false if it is no longer
    /// pending or failed.
    pub fn mark_processing(&self, id: &str) -> LedgerResult<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE transfers SET status = ?1, updated_at = ?2 \
             WHERE id = ?3 AND status IN (?4, ?5)",
            params![
                TransferStatus::Processing.as_str(),
                Utc::now().timestamp_millis(),
                id,
                TransferStatus::Pending.as_str(),
                TransferStatus::Failed.as_str(),
            ],
        )?;
        Ok(updated == 1)
    }

    /// Records a successful mint. Only a `processing` transfer can complete.
    pub fn mark_completed(&self, id: &str, destination_tx_hash: &str) -> LedgerResult<bool> {
        let conn = self.lock()?;
        let now = Utc::now().timestamp_millis();
        let updated = conn.execute(
            "UPDATE transfers \
             SET status = ?1, destination_tx_hash = ?2, error_message = NULL, \
                 processed_at = ?3, updated_at = ?3 \
             WHERE id = ?4 AND status = ?5",
            params![
                TransferStatus::Completed.as_str(),
                destination_tx_hash,
                now,
                id,
                TransferStatus::Processing.as_str(),
            ],
        )?;
        Ok(updated == 1)
    }

    /// Records a failed attempt and increments the retry count in the same
    /// statement. Completed transfers are left untouched.
    pub fn mark_failed(&self, id: &str, error_message: &str) -> LedgerResult<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE transfers \
             SET status = ?1, error_message = ?2, retry_count = retry_count + 1, updated_at = ?3 \
             WHERE id = ?4 AND status != ?5",
            params![
                TransferStatus::Failed.as_str(),
                error_message,
                Utc::now().timestamp_millis(),
                id,
                TransferStatus::Completed.as_str(),
            ],
        )?;
        Ok(updated == 1)
    }

    pub fn get_cursor(&self, chain: ChainKind) -> LedgerResult<Option<ChainCursor>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT last_processed_block, last_processed_signature, updated_at \
                 FROM chain_status WHERE chain = ?1",
                params![chain.as_str()],
                |row| {
                    Ok((
                        row.get::<_, Option<i64>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        raw.map(|(block, signature, updated_at)| {
            Ok(ChainCursor {
                chain,
                last_processed_block: block.map(|b| b as u64),
                last_processed_signature: signature,
                updated_at: millis_to_datetime("updated_at", updated_at)?,
            })
        })
        .transpose()
    }

    /// Stores the chain's scan position. A block cursor never moves backwards.
    pub fn upsert_cursor(&self, chain: ChainKind, position: &ChainPosition) -> LedgerResult<()> {
        let conn = self.lock()?;
        let now = Utc::now().timestamp_millis();

        match position {
            ChainPosition::Block(block) => {
                conn.execute(
                    "INSERT INTO chain_status (chain, last_processed_block, updated_at) \
                     VALUES (?1, ?2, ?3) \
                     ON CONFLICT(chain) DO UPDATE SET \
                       last_processed_block = MAX(COALESCE(last_processed_block, 0), excluded.last_processed_block), \
                       updated_at = excluded.updated_at",
                    params![chain.as_str(), *block as i64, now],
                )?;
            }
            ChainPosition::Signature(signature) => {
                conn.execute(
                    "INSERT INTO chain_status (chain, last_processed_signature, updated_at) \
                     VALUES (?1, ?2, ?3) \
                     ON CONFLICT(chain) DO UPDATE SET \
                       last_processed_signature = excluded.last_processed_signature, \
                       updated_at = excluded.updated_at",
                    params![chain.as_str(), signature, now],
                )?;
            }
        }

        Ok(())
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LedgerError::LockPoisoned)
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

/// Column values as read from SQLite, before domain parsing.
struct RawTransfer {
    id: String,
    source_chain: String,
    destination_chain: String,
    source_token_address: String,
    destination_token_address: String,
    amount: String,
    source_address: String,
    destination_address: String,
    source_tx_hash: String,
    destination_tx_hash: Option<String>,
    status: String,
    retry_count: i64,
    error_message: Option<String>,
    created_at: i64,
    updated_at: i64,
    processed_at: Option<i64>,
}

impl RawTransfer {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source_chain: row.get(1)?,
            destination_chain: row.get(2)?,
            source_token_address: row.get(3)?,
            destination_token_address: row.get(4)?,
            amount: row.get(5)?,
            source_address: row.get(6)?,
            destination_address: row.get(7)?,
            source_tx_hash: row.get(8)?,
            destination_tx_hash: row.get(9)?,
            status: row.get(10)?,
            retry_count: row.get(11)?,
            error_message: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
            processed_at: row.get(15)?,
        })
    }

    fn into_transfer(self) -> LedgerResult<Transfer> {
        Ok(Transfer {
            id: self.id,
            source_chain: parse_chain("source_chain", &self.source_chain)?,
            destination_chain: parse_chain("destination_chain", &self.destination_chain)?,
            source_token_address: self.source_token_address,
            destination_token_address: self.destination_token_address,
            amount: self.amount,
            source_address: self.source_address,
            destination_address: self.destination_address,
            source_tx_hash: self.source_tx_hash,
            destination_tx_hash: self.destination_tx_hash,
            status: self.status.parse()?,
            retry_count: u32::try_from(self.retry_count).map_err(|_| LedgerError::InvalidValue {
                field: "retry_count",
                value: self.retry_count.to_string(),
            })?,
            error_message: self.error_message,
            created_at: millis_to_datetime("created_at", self.created_at)?,
            updated_at: millis_to_datetime("updated_at", self.updated_at)?,
            processed_at: self
                .processed_at
                .map(|ms| millis_to_datetime("processed_at", ms))
                .transpose()?,
        })
    }
}

fn parse_chain(field: &'static str, value: &str) -> LedgerResult<ChainKind> {
    value.parse().map_err(|_| LedgerError::InvalidValue {
        field,
        value: value.to_string(),
    })
}

fn millis_to_datetime(field: &'static str, ms: i64) -> LedgerResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| LedgerError::InvalidValue {
            field,
            value: ms.to_string(),
        })
}
