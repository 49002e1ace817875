//! REST API Server Module
//!
//! Read-only HTTP surface of the relayer: a health probe and transfer lookups
//! served from the ledger.

pub mod generic;
pub mod transfers;

pub use generic::{ApiResponse, ApiServer, HealthStatus};
pub use transfers::TransfersQuery;
