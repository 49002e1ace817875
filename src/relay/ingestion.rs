//! Ingestion loop
//!
//! Scans one source chain for burn events and records each as a pending
//! transfer. The chain cursor only moves after the whole batch is recorded.

use anyhow::Result;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::InFlightGuard;
use crate::chain::{ChainAdapter, ChainKind, ChainPosition, ScanWindow};
use crate::ledger::{Ledger, NewTransfer};

/// Outcome of one ingestion cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionReport {
    /// Window scanned, `None` if the cycle was skipped
    pub window: Option<ScanWindow>,
    pub discovered: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub malformed: usize,
    /// Cursor stored at the end of the cycle
    pub cursor: Option<ChainPosition>,
}

pub struct IngestionLoop {
    source: Arc<dyn ChainAdapter>,
    destination_token_address: String,
    ledger: Ledger,
    confirmations: u64,
    initial_lookback: u64,
    in_flight: AtomicBool,
}

impl IngestionLoop {
    /// # Arguments
    ///
    /// * `source` - Adapter of the chain being scanned
    /// * `destination_token_address` - Token address on the other chain, stored on each transfer
    /// * `confirmations` - Blocks a burn must be buried under (block-height chains only)
    /// * `initial_lookback` - Blocks behind the head to start from without a cursor
    pub fn new(
        source: Arc<dyn ChainAdapter>,
        destination_token_address: String,
        ledger: Ledger,
        confirmations: u64,
        initial_lookback: u64,
    ) -> Self {
        Self {
            source,
            destination_token_address,
            ledger,
            confirmations,
            initial_lookback,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn chain(&self) -> ChainKind {
        self.source.kind()
    }

    /// Computes the next scan window from the stored cursor.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(window))` - Range to scan
    /// * `Ok(None)` - Not enough newly confirmed blocks yet
    pub async fn next_window(&self) -> Result<Option<ScanWindow>> {
        let chain = self.chain();
        let cursor = self.ledger.get_cursor(chain)?;

        match self.source.current_position().await? {
            Some(head) => {
                let from = match cursor.as_ref().and_then(|c| c.last_processed_block) {
                    Some(last) => last + 1,
                    None => head.saturating_sub(self.initial_lookback),
                };
                let to = head.saturating_sub(self.confirmations);
                if from > to {
                    debug!("{}: no new confirmed blocks (from {} > to {})", chain, from, to);
                    return Ok(None);
                }
                Ok(Some(ScanWindow::Blocks { from, to }))
            }
            None => Ok(Some(ScanWindow::SinceSignature(
                cursor.and_then(|c| c.last_processed_signature),
            ))),
        }
    }

    /// Runs one full cycle: window, fetch, record, advance cursor.
    pub async fn run_cycle(&self) -> Result<IngestionReport> {
        let chain = self.chain();
        let Some(window) = self.next_window().await? else {
            return Ok(IngestionReport::default());
        };
        debug!("{}: scanning {:?}", chain, window);

        let batch = self.source.fetch_burn_events(&window).await?;
        let source_token = self.source.token_address();

        let mut report = IngestionReport {
            discovered: batch.events.len(),
            ..Default::default()
        };

        for event in &batch.events {
            if event.is_sentinel() {
                warn!("{}: skipping undecodable burn in {}", chain, event.source_tx_hash);
                report.malformed += 1;
                continue;
            }

            if self.ledger.find_by_source_tx_hash(&event.source_tx_hash)?.is_some() {
                debug!("{}: transfer {} already recorded", chain, event.source_tx_hash);
                report.duplicates += 1;
                continue;
            }

            let transfer =
                NewTransfer::from_burn(event, chain, &source_token, &self.destination_token_address);
            if self.ledger.insert_pending(&transfer)? {
                info!(
                    "{}: new burn {} of {} from {} to {} on {}",
                    chain,
                    event.source_tx_hash,
                    event.amount,
                    event.source_address,
                    event.destination_address,
                    transfer.destination_chain
                );
                report.inserted += 1;
            } else {
                report.duplicates += 1;
            }
        }

        if let Some(position) = batch.newest_position {
            self.ledger.upsert_cursor(chain, &position)?;
            debug!("{}: cursor advanced to {:?}", chain, position);
            report.cursor = Some(position);
        }

        report.window = Some(window);
        Ok(report)
    }

    /// Scheduler entry point: runs a cycle unless one is already in flight and
    /// logs instead of propagating errors.
    pub async fn tick(&self) {
        let Some(_guard) = InFlightGuard::try_acquire(&self.in_flight) else {
            debug!("{}: previous ingestion cycle still running", self.chain());
            return;
        };

        match self.run_cycle().await {
            Ok(report) if report.inserted > 0 || report.malformed > 0 => info!(
                "{}: ingestion recorded {} new transfer(s), {} duplicate(s), {} malformed",
                self.chain(),
                report.inserted,
                report.duplicates,
                report.malformed
            ),
            Ok(_) => {}
            Err(e) => error!("{}: ingestion cycle failed: {:#}", self.chain(), e),
        }
    }
}
