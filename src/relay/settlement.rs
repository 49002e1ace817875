//! Settlement loop
//!
//! Drains transfers of one direction by minting on the destination chain.

use anyhow::Result;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::InFlightGuard;
use crate::chain::{ChainAdapter, ChainKind};
use crate::ledger::{Ledger, Transfer};

/// Outcome of one settlement cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementReport {
    pub selected: usize,
    pub completed: usize,
    pub failed: usize,
    /// Transfers claimed by someone else between selection and claim
    pub skipped: usize,
}

pub struct SettlementLoop {
    source: ChainKind,
    destination: Arc<dyn ChainAdapter>,
    ledger: Ledger,
    max_retries: u32,
    retry_failed: bool,
    in_flight: AtomicBool,
}

impl SettlementLoop {
    pub fn new(
        source: ChainKind,
        destination: Arc<dyn ChainAdapter>,
        ledger: Ledger,
        max_retries: u32,
        retry_failed: bool,
    ) -> Self {
        Self {
            source,
            destination,
            ledger,
            max_retries,
            retry_failed,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> ChainKind {
        self.source
    }

    pub fn destination(&self) -> ChainKind {
        self.destination.kind()
    }

    /// Processes every eligible transfer, oldest first. A failed mint is
    /// recorded on its transfer and does not stop the batch.
    pub async fn run_cycle(&self) -> Result<SettlementReport> {
        let destination = self.destination();
        let transfers = self.ledger.list_pending_for(
            self.source,
            destination,
            self.max_retries,
            self.retry_failed,
        )?;

        let mut report = SettlementReport {
            selected: transfers.len(),
            ..Default::default()
        };
        if transfers.is_empty() {
            return Ok(report);
        }
        info!(
            "{} -> {}: settling {} transfer(s)",
            self.source,
            destination,
            transfers.len()
        );

        for transfer in &transfers {
            if !self.ledger.mark_processing(&transfer.id)? {
                debug!("Transfer {} no longer eligible, skipping", transfer.id);
                report.skipped += 1;
                continue;
            }

            if self.settle(transfer).await? {
                report.completed += 1;
            } else {
                report.failed += 1;
            }
        }

        Ok(report)
    }

    /// Mints one claimed transfer and records the result. Returns whether the
    /// mint succeeded; only ledger errors propagate.
    async fn settle(&self, transfer: &Transfer) -> Result<bool> {
        info!(
            "Minting {} to {} on {} for {} (attempt {})",
            transfer.amount,
            transfer.destination_address,
            self.destination(),
            transfer.source_tx_hash,
            transfer.retry_count + 1
        );

        match self
            .destination
            .mint(
                &transfer.destination_address,
                &transfer.amount,
                &transfer.source_tx_hash,
            )
            .await
        {
            Ok(destination_tx_hash) => {
                if !self.ledger.mark_completed(&transfer.id, &destination_tx_hash)? {
                    warn!(
                        "Transfer {} minted in {} but was no longer processing",
                        transfer.id, destination_tx_hash
                    );
                }
                info!(
                    "Transfer {} completed: {} -> {}",
                    transfer.id, transfer.source_tx_hash, destination_tx_hash
                );
                Ok(true)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!("Transfer {} failed: {}", transfer.id, message);
                self.ledger.mark_failed(&transfer.id, &message)?;
                Ok(false)
            }
        }
    }

    /// Scheduler entry point: runs a cycle unless one is already in flight and
    /// logs instead of propagating errors.
    pub async fn tick(&self) {
        let Some(_guard) = InFlightGuard::try_acquire(&self.in_flight) else {
            debug!(
                "{} -> {}: previous settlement cycle still running",
                self.source,
                self.destination()
            );
            return;
        };

        if let Err(e) = self.run_cycle().await {
            error!(
                "{} -> {}: settlement cycle failed: {:#}",
                self.source,
                self.destination(),
                e
            );
        }
    }
}
