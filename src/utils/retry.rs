//! Exponential backoff shared by the pipeline and the orchestrator
//!
//! [`RetryConfig::calculate_delay`] paces retries of rate-limited ranges in
//! the harvest pipeline. [`with_retry_if`] wraps report-store writes so a busy
//! SQLite file does not turn into a lost record.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule: `base * multiplier^(attempt - 1)`, capped at `max`
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    pub base_delay_ms: u64,

    /// Ceiling for any single delay
    pub max_delay_ms: u64,

    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::with_delays(3, 1000, 30_000)
    }
}

impl RetryConfig {
    /// Doubling backoff between `base_delay_ms` and `max_delay_ms`
    pub fn with_delays(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            backoff_multiplier: 2.0,
        }
    }

    /// No waiting between attempts
    pub fn immediate(max_retries: u32) -> Self {
        Self::with_delays(max_retries, 0, 0)
    }

    /// Delay before the given attempt; attempt 0 never waits
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let scaled = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis((scaled as u64).min(self.max_delay_ms))
    }
}

/// Run `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or `max_retries` retries are spent
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !should_retry(&err) {
            debug!(error = %err, "Error is not retryable");
            return Err(err);
        }
        if attempt >= config.max_retries {
            warn!(attempts = attempt + 1, error = %err, "Giving up after retries");
            return Err(err);
        }

        attempt += 1;
        let delay = config.calculate_delay(attempt);
        warn!(
            attempt,
            max_retries = config.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after error"
        );
        tokio::time::sleep(delay).await;
    }
}
