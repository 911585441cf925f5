//! Bounded retry for transient store failures.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::db::errors::{DbError, Result};

impl RetryConfig {
    /// Delay before retry number `retry` (0-based): `base_delay * 2^retry`, capped at `max_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation`, retrying while it fails with a transient error.
///
/// Non-transient errors are returned immediately. When attempts run out the last error is
/// returned as [`DbError::Unavailable`] carrying the number of attempts made.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = config.backoff(attempt - 1);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient store error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(DbError::Unavailable { message, .. }) => {
                tracing::error!(operation, attempts = attempt, "Store unavailable, giving up");
                return Err(DbError::Unavailable { attempts: attempt, message });
            }
            Err(err) => return Err(err),
        }
    }
}
