//! Timeout, retry and exponential backoff for external service calls.
//!
//! Every call to the embedding or generation service goes through
//! [`with_retry`]:
//! - each attempt is bounded by the configured timeout; a timeout counts as
//!   [`ServiceError::TransientNetwork`]
//! - rate limits and network errors are retried up to `max_retries` times
//! - anything else (auth, invalid input, undecodable responses) is returned
//!   immediately
//! - backoff: `base, 2×base, 4×base, …`, capped at `max_delay`

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::ServiceError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            timeout: config.timeout(),
        }
    }

    /// No waiting between attempts; handy in tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            timeout: Duration::from_secs(30),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op` under `policy`. `what` names the call in log output.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 0u32;
    loop {
        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::TransientNetwork(format!(
                "{} timed out after {:?}",
                what, policy.timeout
            ))),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    call = what,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying external call"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if err.is_retryable() {
                    tracing::error!(call = what, attempts = attempt + 1, error = %err, "giving up");
                }
                return Err(err);
            }
        }
    }
}
