//! Exponential backoff retry for provider calls.
//!
//! Transient provider failures are retried with exponential backoff;
//! permanent failures are returned immediately. Rebase errors never come
//! through here - they are classified in the git module and handled by the
//! branch controller in a single attempt.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::IoResult;

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,

    /// Initial delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (cap for exponential growth).
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Default policy for provider calls: 3 retries at 2s, 4s, 8s.
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(16),
    };

    /// Computes the delay for the given retry attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        exp.min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig::DEFAULT
    }
}

/// Runs `op`, retrying transient failures per `config`.
///
/// `action` is used only for logging.
pub async fn with_retry<T, F, Fut>(config: RetryConfig, action: &str, mut op: F) -> IoResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = IoResult<T>>,
{
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    action,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient provider error, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
