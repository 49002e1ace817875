//! Unit tests for the settlement loop
//!
//! These tests drive `SettlementLoop` against a scripted destination adapter
//! and an in-memory ledger.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use bridge_relayer::chain::ChainKind;
use bridge_relayer::ledger::{Ledger, NewTransfer, TransferStatus};
use bridge_relayer::relay::SettlementLoop;

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{
    burn_event, create_test_ledger, new_transfer, MockChainAdapter, DUMMY_EVM_ADDR,
    DUMMY_EVM_TOKEN_ADDR, DUMMY_SVM_TOKEN_MINT,
};

/// EVM -> Solana settlement with a ceiling of 5 and failed retries enabled.
fn evm_to_solana(ledger: Ledger) -> (SettlementLoop, Arc<MockChainAdapter>) {
    let destination = Arc::new(MockChainAdapter::solana());
    let settlement = SettlementLoop::new(ChainKind::Ethereum, destination.clone(), ledger, 5, true);
    (settlement, destination)
}

// ============================================================================
// SUCCESSFUL SETTLEMENT
// ============================================================================

/// What is tested: a pending transfer is minted once and marked completed with the mint hash
/// Why: this is the relayer's main job
#[tokio::test]
async fn test_pending_transfer_completed() {
    let ledger = create_test_ledger();
    ledger.insert_pending(&new_transfer("0xabc")).unwrap();
    let (settlement, destination) = evm_to_solana(ledger.clone());
    destination.push_mint_result(Ok("destsig"));

    let report = settlement.run_cycle().await.unwrap();
    assert_eq!(report.selected, 1);
    assert_eq!(report.completed, 1);

    let mints = destination.mint_calls();
    assert_eq!(mints.len(), 1);
    assert_eq!(mints[0].1, "1000");
    assert_eq!(mints[0].2, "0xabc");

    let transfer = ledger.find_by_source_tx_hash("0xabc").unwrap().unwrap();
    assert_eq!(transfer.status, TransferStatus::Completed);
    assert_eq!(transfer.destination_tx_hash.as_deref(), Some("destsig"));
    assert!(transfer.processed_at.is_some());

    // Nothing left to do
    let again = settlement.run_cycle().await.unwrap();
    assert_eq!(again.selected, 0);
    assert_eq!(destination.mint_calls().len(), 1);
}

/// What is tested: transfers are settled in detection order
/// Why: users expect first-burned, first-minted
#[tokio::test]
async fn test_settles_oldest_first() {
    let ledger = create_test_ledger();
    for hash in ["0x01", "0x02", "0x03"] {
        ledger.insert_pending(&new_transfer(hash)).unwrap();
    }
    let (settlement, destination) = evm_to_solana(ledger);

    settlement.run_cycle().await.unwrap();

    let order: Vec<_> = destination.mint_calls().into_iter().map(|m| m.2).collect();
    assert_eq!(order, vec!["0x01", "0x02", "0x03"]);
}

/// What is tested: a loop only picks up transfers of its own direction
/// Why: minting a Solana burn on Solana would be a double spend
#[tokio::test]
async fn test_only_own_direction_selected() {
    let ledger = create_test_ledger();
    let solana_burn = NewTransfer::from_burn(
        &burn_event("solsig", "7", DUMMY_EVM_ADDR),
        ChainKind::Solana,
        DUMMY_SVM_TOKEN_MINT,
        DUMMY_EVM_TOKEN_ADDR,
    );
    ledger.insert_pending(&solana_burn).unwrap();
    let (settlement, destination) = evm_to_solana(ledger);

    let report = settlement.run_cycle().await.unwrap();
    assert_eq!(report.selected, 0);
    assert!(destination.mint_calls().is_empty());
}

// ============================================================================
// FAILURES AND RETRIES
// ============================================================================

/// What is tested: a failed mint marks the transfer failed with its message and one retry
/// Why: operators see failures only through the ledger
#[tokio::test]
async fn test_mint_failure_recorded() {
    let ledger = create_test_ledger();
    ledger.insert_pending(&new_transfer("0xabc")).unwrap();
    ledger.insert_pending(&new_transfer("0xdef")).unwrap();
    let (settlement, destination) = evm_to_solana(ledger.clone());
    destination.push_mint_result(Err("insufficient funds for gas"));

    let report = settlement.run_cycle().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.completed, 1, "a failure must not stop the batch");

    let failed = ledger.find_by_source_tx_hash("0xabc").unwrap().unwrap();
    assert_eq!(failed.status, TransferStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    assert!(failed
        .error_message
        .as_deref()
        .unwrap()
        .contains("insufficient funds"));
    assert!(failed.destination_tx_hash.is_none());
}

/// What is tested: failed transfers are retried until the ceiling, then left alone
/// Why: a permanently broken transfer must not be minted forever
#[tokio::test]
async fn test_retry_ceiling_stops_selection() {
    let ledger = create_test_ledger();
    ledger.insert_pending(&new_transfer("0xabc")).unwrap();
    let destination = Arc::new(MockChainAdapter::solana());
    let settlement = SettlementLoop::new(ChainKind::Ethereum, destination.clone(), ledger.clone(), 2, true);

    destination.push_mint_result(Err("rpc down"));
    destination.push_mint_result(Err("rpc down"));
    settlement.run_cycle().await.unwrap();
    settlement.run_cycle().await.unwrap();

    let report = settlement.run_cycle().await.unwrap();
    assert_eq!(report.selected, 0);
    assert_eq!(destination.mint_calls().len(), 2);

    let transfer = ledger.find_by_source_tx_hash("0xabc").unwrap().unwrap();
    assert_eq!(transfer.status, TransferStatus::Failed);
    assert_eq!(transfer.retry_count, 2);
}

/// What is tested: a failed transfer that later succeeds ends completed with the error cleared
/// Why: retries must converge to the same terminal state as a first-try success
#[tokio::test]
async fn test_failed_transfer_retried_to_completion() {
    let ledger = create_test_ledger();
    ledger.insert_pending(&new_transfer("0xabc")).unwrap();
    let (settlement, destination) = evm_to_solana(ledger.clone());
    destination.push_mint_result(Err("blockhash not found"));
    destination.push_mint_result(Ok("destsig"));

    settlement.run_cycle().await.unwrap();
    settlement.run_cycle().await.unwrap();

    let transfer = ledger.find_by_source_tx_hash("0xabc").unwrap().unwrap();
    assert_eq!(transfer.status, TransferStatus::Completed);
    assert_eq!(transfer.retry_count, 1);
    assert!(transfer.error_message.is_none());
    assert_eq!(transfer.destination_tx_hash.as_deref(), Some("destsig"));
}

/// What is tested: with retry_failed off, failed transfers are never re-selected
/// Why: operators may want to inspect failures before anything is re-minted
#[tokio::test]
async fn test_retry_failed_disabled() {
    let ledger = create_test_ledger();
    ledger.insert_pending(&new_transfer("0xabc")).unwrap();
    let destination = Arc::new(MockChainAdapter::solana());
    let settlement = SettlementLoop::new(ChainKind::Ethereum, destination.clone(), ledger.clone(), 5, false);
    destination.push_mint_result(Err("boom"));

    settlement.run_cycle().await.unwrap();
    let report = settlement.run_cycle().await.unwrap();

    assert_eq!(report.selected, 0);
    assert_eq!(destination.mint_calls().len(), 1);
}

/// What is tested: a transfer already claimed elsewhere is not minted
/// Why: the claim is the guard against concurrent double settlement
#[tokio::test]
async fn test_processing_transfer_not_reselected() {
    let ledger = create_test_ledger();
    ledger.insert_pending(&new_transfer("0xabc")).unwrap();
    let id = ledger.find_by_source_tx_hash("0xabc").unwrap().unwrap().id;
    ledger.mark_processing(&id).unwrap();
    let (settlement, destination) = evm_to_solana(ledger);

    let report = settlement.run_cycle().await.unwrap();
    assert_eq!(report.selected, 0);
    assert!(destination.mint_calls().is_empty());
}

/// What is tested: tick() returns at once while the same loop is still minting
/// Why: an overlapping cycle would claim and mint the next transfer concurrently
#[tokio::test]
async fn test_tick_skipped_while_cycle_in_flight() {
    let ledger = create_test_ledger();
    ledger.insert_pending(&new_transfer("0xabc")).unwrap();
    let (settlement, destination) = evm_to_solana(ledger.clone());
    let settlement = Arc::new(settlement);
    let gate = Arc::new(Notify::new());
    destination.hold_mints(gate.clone());

    let first = tokio::spawn({
        let settlement = settlement.clone();
        async move { settlement.tick().await }
    });
    while destination.mint_calls().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Second tick must not wait on the held mint
    tokio::time::timeout(Duration::from_secs(1), settlement.tick())
        .await
        .expect("overlapping tick should return immediately");
    assert_eq!(destination.mint_calls().len(), 1);

    gate.notify_one();
    first.await.unwrap();

    let transfer = ledger.find_by_source_tx_hash("0xabc").unwrap().unwrap();
    assert_eq!(transfer.status, TransferStatus::Completed);
    assert_eq!(destination.mint_calls().len(), 1);
}
