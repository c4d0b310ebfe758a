//! Exponential backoff for throttled AWS API calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

/// Retry policy applied to a single API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_attempts: 6,
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (0-based), doubling up to `max_delay`.
    pub fn delay(&self, retry: u32) -> Duration {
        self.base
            .saturating_mul(1u32 << retry.min(16))
            .min(self.max_delay)
    }
}

/// Run `call`, repeating it while it fails with a throttling error.
///
/// Any other error, or a throttling error on the last attempt, is returned
/// unchanged.
pub async fn with_backoff<T, F, Fut>(backoff: &Backoff, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Err(e) if e.is_throttling() && attempt < backoff.max_attempts => {
                let delay = backoff.delay(attempt - 1);
                warn!(
                    operation = operation,
                    attempt = attempt,
                    max_attempts = backoff.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "AWS request throttled, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
