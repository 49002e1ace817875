//! Relay service
//!
//! Wires one ingestion loop per source chain and one settlement loop per
//! direction onto periodic schedulers that share a shutdown signal.

pub mod ingestion;
pub mod settlement;

pub use ingestion::{IngestionLoop, IngestionReport};
pub use settlement::{SettlementLoop, SettlementReport};

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

use crate::chain::ChainAdapter;
use crate::config::Config;
use crate::ledger::Ledger;

// ============================================================================
// IN-FLIGHT GUARD
// ============================================================================

/// Held while a loop iteration runs; clears the flag when dropped.
pub(crate) struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    /// Returns `None` if an iteration guarded by `flag` is already running.
    pub(crate) fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// Runs `task` every `period` until `shutdown` fires.
///
/// Iterations are awaited in place, so a slow iteration delays the next tick
/// instead of overlapping it; ticks missed meanwhile are dropped. Shutdown is
/// only observed between iterations.
pub async fn run_periodic<F, Fut>(
    name: String,
    period: Duration,
    run_immediately: bool,
    mut shutdown: broadcast::Receiver<()>,
    mut task: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let start = if run_immediately {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("{} started (interval {}ms)", name, period.as_millis());
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = ticker.tick() => task().await,
        }
    }
    info!("{} stopped", name);
}

// ============================================================================
// SHUTDOWN SIGNAL
// ============================================================================

/// Process signals that stop the relayer: SIGINT and SIGTERM on Unix, Ctrl-C
/// elsewhere.
///
/// Handlers are registered by [`ShutdownSignal::install`], so a signal sent
/// after it returns is never lost.
pub struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    pub fn install() -> Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                interrupt: signal(SignalKind::interrupt())
                    .context("Failed to install SIGINT handler")?,
                terminate: signal(SignalKind::terminate())
                    .context("Failed to install SIGTERM handler")?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Waits for the next shutdown signal and returns its name.
    pub async fn recv(&mut self) -> Result<&'static str> {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.interrupt.recv() => Ok("SIGINT"),
                _ = self.terminate.recv() => Ok("SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            Ok("Ctrl-C")
        }
    }
}

// ============================================================================
// RELAYER
// ============================================================================

/// The four relay loops of a bridge deployment.
pub struct Relayer {
    ingestion: Vec<Arc<IngestionLoop>>,
    settlement: Vec<Arc<SettlementLoop>>,
    polling_interval: Duration,
    processing_interval: Duration,
}

impl Relayer {
    pub fn new(
        config: &Config,
        ledger: Ledger,
        evm: Arc<dyn ChainAdapter>,
        svm: Arc<dyn ChainAdapter>,
    ) -> Self {
        let (evm_kind, svm_kind) = (evm.kind(), svm.kind());
        let ingestion = vec![
            Arc::new(IngestionLoop::new(
                evm.clone(),
                svm.token_address(),
                ledger.clone(),
                config.evm.confirmations,
                config.evm.initial_lookback_blocks,
            )),
            Arc::new(IngestionLoop::new(
                svm.clone(),
                evm.token_address(),
                ledger.clone(),
                0,
                0,
            )),
        ];

        let settlement = vec![
            Arc::new(SettlementLoop::new(
                evm_kind,
                svm,
                ledger.clone(),
                config.relayer.max_retries,
                config.relayer.retry_failed,
            )),
            Arc::new(SettlementLoop::new(
                svm_kind,
                evm,
                ledger,
                config.relayer.max_retries,
                config.relayer.retry_failed,
            )),
        ];

        Self {
            ingestion,
            settlement,
            polling_interval: Duration::from_millis(config.relayer.polling_interval_ms),
            processing_interval: Duration::from_millis(config.relayer.processing_interval_ms),
        }
    }

    pub fn ingestion_loops(&self) -> &[Arc<IngestionLoop>] {
        &self.ingestion
    }

    pub fn settlement_loops(&self) -> &[Arc<SettlementLoop>] {
        &self.settlement
    }

    /// Spawns every loop on its scheduler. Ingestion runs once right away to
    /// catch up; settlement waits for its first interval.
    pub fn spawn(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.ingestion.len() + self.settlement.len());

        for ingestion in &self.ingestion {
            let ingestion = ingestion.clone();
            let name = format!("{} ingestion loop", ingestion.chain());
            handles.push(tokio::spawn(run_periodic(
                name,
                self.polling_interval,
                true,
                shutdown.subscribe(),
                move || {
                    let ingestion = ingestion.clone();
                    async move { ingestion.tick().await }
                },
            )));
        }

        for settlement in &self.settlement {
            let settlement = settlement.clone();
            let name = format!(
                "{} -> {} settlement loop",
                settlement.source(),
                settlement.destination()
            );
            handles.push(tokio::spawn(run_periodic(
                name,
                self.processing_interval,
                false,
                shutdown.subscribe(),
                move || {
                    let settlement = settlement.clone();
                    async move { settlement.tick().await }
                },
            )));
        }

        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_in_flight_guard() {
        let flag = AtomicBool::new(false);
        let guard = InFlightGuard::try_acquire(&flag).unwrap();
        assert!(InFlightGuard::try_acquire(&flag).is_none());
        drop(guard);
        assert!(InFlightGuard::try_acquire(&flag).is_some());
    }

    /// What is tested: the scheduler runs immediately and stops on shutdown
    #[tokio::test]
    async fn test_run_periodic_stops_on_shutdown() {
        let (tx, _) = broadcast::channel(1);
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();

        let handle = tokio::spawn(run_periodic(
            "test loop".to_string(),
            Duration::from_millis(10),
            true,
            tx.subscribe(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        ));

        tokio::time::sleep(Duration::from_millis(35)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        let runs = count.load(Ordering::SeqCst);
        assert!(runs >= 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), runs);
    }
}
