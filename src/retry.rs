//! Rate-limit retry wrapper
//!
//! Re-runs an RPC operation with exponential backoff while the failure looks like
//! provider rate limiting. Any other failure is returned immediately.

use anyhow::Result;
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::RelayerConfig;
use crate::rpc::RpcError;

/// Phrases that mark an error as rate limiting.
const RATE_LIMIT_PHRASES: [&str; 2] = ["too many requests", "rate limit"];

/// Status code matched only as a standalone token, never inside URLs or keys.
const RATE_LIMIT_STATUS: &str = "429";

/// Backoff parameters for rate-limited calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubled on every subsequent one
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
        }
    }

    pub fn from_config(config: &RelayerConfig) -> Self {
        Self::new(
            config.rate_limit_max_retries,
            Duration::from_millis(config.rate_limit_initial_delay_ms),
        )
    }

    /// Runs `operation`, retrying it while it fails with a rate-limit error and
    /// the retry budget is not exhausted.
    ///
    /// # Arguments
    ///
    /// * `label` - Operation name used in log lines
    /// * `operation` - Factory producing a fresh future per attempt
    ///
    /// # Returns
    ///
    /// * `Ok(T)` - First successful result
    /// * `Err(anyhow::Error)` - Non rate-limit error, or the last error once the budget is spent
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        let mut delay = self.initial_delay;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !is_rate_limit_error(&e) || retries >= self.max_retries {
                        return Err(e);
                    }
                    retries += 1;
                    warn!(
                        "Rate limit hit on {}. Retrying in {}ms ({}/{})",
                        label,
                        delay.as_millis(),
                        retries,
                        self.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }
}

/// Returns true if the error chain signals rate limiting.
///
/// A typed `RpcError::Http` decides by its status code. Other errors are
/// matched on their message text.
pub fn is_rate_limit_error(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(RpcError::Http { status, .. }) = cause.downcast_ref::<RpcError>() {
            return *status == StatusCode::TOO_MANY_REQUESTS;
        }
    }

    let message = format!("{:#}", err).to_lowercase();
    RATE_LIMIT_PHRASES.iter().any(|phrase| message.contains(phrase))
        || message
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|token| token == RATE_LIMIT_STATUS)
}
