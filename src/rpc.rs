//! JSON-RPC transport shared by the EVM and Solana adapters
//!
//! Every call goes through the rate-limit retry policy, so adapters get
//! per-request backoff without wrapping anything themselves.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Per-request timeout for JSON-RPC calls.
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// JSON-RPC TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a serde_json::Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    #[serde(default)]
    code: i64,
    message: String,
}

/// Transport-level failures. Rate-limit detection downcasts to `Http` to read
/// the status code.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP {status} from {method}: {body}")]
    Http {
        method: String,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("JSON-RPC error from {method}: {message} (code: {code})")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },
    #[error("No result in {method} response")]
    MissingResult { method: String },
}

// ============================================================================
// CLIENT
// ============================================================================

/// Minimal JSON-RPC 2.0 client over HTTP POST.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    client: Client,
    url: String,
    retry: RetryPolicy,
}

impl JsonRpcClient {
    pub fn new(url: &str, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(RPC_TIMEOUT)
            .no_proxy()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: url.to_string(),
            retry,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Calls `method` with `params` and deserializes the `result` field.
    ///
    /// A JSON `null` result deserializes fine into `Option<_>`; use that for
    /// lookups that may legitimately find nothing (receipts, transactions).
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let params = &params;
        self.retry
            .run(method, || self.call_once(method, params))
            .await
    }

    async fn call_once<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &serde_json::Value,
    ) -> Result<T> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let resp = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", method))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::Http {
                method: method.to_string(),
                status,
                body,
            }
            .into());
        }

        let response: JsonRpcResponse = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", method))?;

        if let Some(error) = response.error {
            return Err(RpcError::Rpc {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            }
            .into());
        }

        // `result: null` arrives as `None` through serde's Option handling.
        let result = response.result.unwrap_or(serde_json::Value::Null);
        if result.is_null() && serde_json::from_value::<T>(serde_json::Value::Null).is_err() {
            return Err(RpcError::MissingResult {
                method: method.to_string(),
            }
            .into());
        }

        serde_json::from_value(result)
            .with_context(|| format!("Failed to deserialize {} result", method))
    }
}
