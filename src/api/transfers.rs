//! Transfer endpoints
//!
//! `GET /api/transfers` lists transfers newest first; `GET /api/transfers/{hash}`
//! returns a single transfer by its source transaction hash.

use serde::Deserialize;
use warp::http::StatusCode;

use super::generic::{ApiResponse, InvalidQueryParam, LedgerUnavailable};
use crate::chain::ChainKind;
use crate::ledger::{Ledger, Transfer, TransferQuery, TransferStatus, DEFAULT_QUERY_LIMIT};

/// Largest page a single listing returns.
pub const MAX_QUERY_LIMIT: usize = 500;

/// Query string of `GET /api/transfers`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransfersQuery {
    pub status: Option<String>,
    pub source_chain: Option<String>,
    pub limit: Option<usize>,
}

impl TransfersQuery {
    /// Validates the raw query into a ledger query.
    pub fn into_ledger_query(self) -> Result<TransferQuery, InvalidQueryParam> {
        let status = match self.status.as_deref().filter(|s| !s.is_empty()) {
            Some(s) => Some(
                s.parse::<TransferStatus>()
                    .map_err(|_| InvalidQueryParam(format!("Unknown status '{}'", s)))?,
            ),
            None => None,
        };
        let source_chain = match self.source_chain.as_deref().filter(|s| !s.is_empty()) {
            Some(s) => Some(
                s.parse::<ChainKind>()
                    .map_err(|_| InvalidQueryParam(format!("Unknown sourceChain '{}'", s)))?,
            ),
            None => None,
        };
        let limit = match self.limit {
            None | Some(0) => DEFAULT_QUERY_LIMIT,
            Some(n) => n.min(MAX_QUERY_LIMIT),
        };

        Ok(TransferQuery {
            status,
            source_chain,
            limit,
        })
    }
}

/// Handler for `GET /api/transfers`.
///
/// # Returns
///
/// * `Ok(warp::Reply)` - JSON array of transfers, newest first
/// * `Err(warp::Rejection)` - Invalid filter or ledger failure
pub async fn list_transfers_handler(
    query: TransfersQuery,
    ledger: Ledger,
) -> Result<impl warp::Reply, warp::Rejection> {
    let query = query.into_ledger_query().map_err(warp::reject::custom)?;
    let transfers: Vec<Transfer> = ledger
        .list(&query)
        .map_err(|e| warp::reject::custom(LedgerUnavailable(e.to_string())))?;

    Ok(warp::reply::json(&transfers))
}

/// Handler for `GET /api/transfers/{source_tx_hash}`.
pub async fn get_transfer_handler(
    source_tx_hash: String,
    ledger: Ledger,
) -> Result<impl warp::Reply, warp::Rejection> {
    let transfer = ledger
        .find_by_source_tx_hash(&source_tx_hash)
        .map_err(|e| warp::reject::custom(LedgerUnavailable(e.to_string())))?;

    Ok(match transfer {
        Some(transfer) => warp::reply::with_status(
            warp::reply::json(&ApiResponse::ok(transfer)),
            StatusCode::OK,
        ),
        None => warp::reply::with_status(
            warp::reply::json(&ApiResponse::<Transfer>::err(format!(
                "No transfer found for source transaction {}",
                source_tx_hash
            ))),
            StatusCode::NOT_FOUND,
        ),
    })
}
