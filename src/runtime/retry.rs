use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::runtime::error::NodeError;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Scale each delay by a random factor in [0.8, 1.2].
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before retry number `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_millis() as u64;
        let cap = self.max_backoff.as_millis() as u64;
        let ms = base.saturating_mul(2u64.saturating_pow(attempt)).min(cap);
        if !self.jitter {
            return Duration::from_millis(ms);
        }
        let jitter = 0.8 + rand::random::<f64>() * 0.4;
        Duration::from_millis((ms as f64 * jitter) as u64)
    }
}

/// Run `op` until it succeeds, fails permanently, or the retry budget is spent.
/// `op` receives the zero-based attempt number.
pub async fn retry_with_backoff<F, Fut>(policy: &RetryPolicy, node_id: &str, mut op: F) -> Result<Value, NodeError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Value, NodeError>>,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let backoff = policy.backoff(attempt);
                warn!(
                    node_id,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Retrying node"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) if e.is_retryable() && attempt > 0 => {
                return Err(NodeError::RetriesExhausted {
                    attempts: attempt + 1,
                    source: Box::new(e),
                });
            }
            Err(e) => return Err(e),
        }
    }
}
