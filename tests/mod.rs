//! Test module organization
//!
//! This module re-exports test helpers for use in test files.

mod helpers;

#[allow(unused_imports)]
pub use helpers::{
    build_test_config, build_test_config_with_mock_servers, burn_event, create_test_ledger,
    new_transfer, MockChainAdapter, DUMMY_EVM_ADDR, DUMMY_EVM_TOKEN_ADDR, DUMMY_SVM_ADDR,
    DUMMY_SVM_PROGRAM_ID, DUMMY_SVM_SIGNATURE_1, DUMMY_SVM_SIGNATURE_2, DUMMY_SVM_SIGNATURE_3,
    DUMMY_SVM_TOKEN_MINT, DUMMY_TX_HASH, TEST_EVM_PRIVATE_KEY,
};
