//! Generic API structures and server
//!
//! This module contains the response envelope, filter helpers, CORS setup,
//! rejection handling and the server that mounts the transfer routes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use warp::{
    http::{Method, StatusCode},
    Filter, Rejection, Reply,
};

use super::transfers;
use crate::config::ApiConfig;
use crate::ledger::Ledger;

// ============================================================================
// SHARED RESPONSE STRUCTURES
// ============================================================================

/// Envelope used for error responses and single-record lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Response data (if successful)
    pub data: Option<T>,
    /// Error message (if failed)
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub status: String,
}

// ============================================================================
// WARP FILTER HELPERS
// ============================================================================

/// Creates a warp filter that injects the ledger into request handlers.
pub fn with_ledger(
    ledger: Ledger,
) -> impl Filter<Extract = (Ledger,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || ledger.clone())
}

// ============================================================================
// CUSTOM REJECTION TYPES
// ============================================================================

/// Query parameter that parsed but holds an unsupported value.
#[derive(Debug)]
pub struct InvalidQueryParam(pub String);

impl warp::reject::Reject for InvalidQueryParam {}

/// Ledger read failed while serving a request.
#[derive(Debug)]
pub struct LedgerUnavailable(pub String);

impl warp::reject::Reject for LedgerUnavailable {}

// ============================================================================
// CORS CONFIGURATION
// ============================================================================

/// Creates a CORS filter based on the configured allowed origins.
fn create_cors_filter(allowed_origins: &[String]) -> warp::cors::Builder {
    let methods = vec![Method::GET, Method::OPTIONS];

    if allowed_origins.iter().any(|origin| origin == "*") {
        warp::cors()
            .allow_any_origin()
            .allow_methods(methods)
            .allow_headers(vec!["content-type"])
    } else {
        let origins: Vec<&str> = allowed_origins.iter().map(|s| s.as_str()).collect();
        warp::cors()
            .allow_origins(origins)
            .allow_methods(methods)
            .allow_headers(vec!["content-type"])
    }
}

// ============================================================================
// REJECTION HANDLER
// ============================================================================

/// Converts warp rejections into `ApiResponse` errors with matching status codes.
pub async fn handle_rejection(rej: Rejection) -> Result<impl Reply, std::convert::Infallible> {
    let (status, message) = if let Some(err) = rej.find::<InvalidQueryParam>() {
        (StatusCode::BAD_REQUEST, err.0.clone())
    } else if let Some(err) = rej.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, format!("Invalid query: {}", err))
    } else if let Some(err) = rej.find::<LedgerUnavailable>() {
        error!("Ledger error while serving request: {}", err.0);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
    } else if rej.is_not_found() {
        (StatusCode::NOT_FOUND, "Endpoint not found".to_string())
    } else if rej.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", rej);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ApiResponse::<()>::err(message)),
        status,
    ))
}

// ============================================================================
// API SERVER IMPLEMENTATION
// ============================================================================

/// Read-only HTTP surface over the transfer ledger.
pub struct ApiServer {
    config: Arc<ApiConfig>,
    ledger: Ledger,
}

impl ApiServer {
    pub fn new(config: ApiConfig, ledger: Ledger) -> Self {
        Self {
            config: Arc::new(config),
            ledger,
        }
    }

    /// Binds the configured address and returns the server future.
    ///
    /// Binding happens here, so an unusable address fails at startup rather
    /// than inside a spawned task. The returned future completes once
    /// `shutdown` resolves and in-flight requests are done.
    ///
    /// # Returns
    ///
    /// * `Ok((addr, server))` - Bound address and the future driving the server
    /// * `Err(anyhow::Error)` - Invalid address or bind failure
    pub fn bind(
        &self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(SocketAddr, impl Future<Output = ()>)> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Failed to parse API server address")?;

        let (bound, server) = warp::serve(self.create_routes())
            .try_bind_with_graceful_shutdown(addr, shutdown)
            .with_context(|| format!("Failed to bind API server to {}", addr))?;
        info!("API server listening on {}", bound);

        Ok((bound, server))
    }

    /// Creates all API routes for the server.
    pub(crate) fn create_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        let health = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&HealthStatus {
                    status: "ok".to_string(),
                })
            });

        let list_transfers = warp::path!("api" / "transfers")
            .and(warp::get())
            .and(warp::query::<transfers::TransfersQuery>())
            .and(with_ledger(self.ledger.clone()))
            .and_then(transfers::list_transfers_handler);

        let get_transfer = warp::path!("api" / "transfers" / String)
            .and(warp::get())
            .and(with_ledger(self.ledger.clone()))
            .and_then(transfers::get_transfer_handler);

        health
            .or(list_transfers)
            .or(get_transfer)
            .with(create_cors_filter(&self.config.cors_origins))
            .recover(handle_rejection)
    }

    /// Public method for testing - exposes routes for integration tests
    pub fn test_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        self.create_routes()
    }
}
