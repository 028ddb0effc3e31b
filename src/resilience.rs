//! Retry with exponential backoff for upstream calls.
//!
//! Only failures classified transient by [`ServerError::is_transient`] are
//! retried: connection errors, timeouts and 429/502/503/504 responses.
//! Everything else (404, 403, payload errors) fails on the first attempt.

use crate::constants::{
    DEFAULT_RETRY_INITIAL_DELAY_MS, DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_RETRY_MAX_DELAY,
};
use crate::error::ServerError;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff policy for upstream requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Spread delays by +/- 25% so concurrent batch fetches do not retry in lockstep.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_RETRY_INITIAL_DELAY_MS),
            max_delay: DEFAULT_RETRY_MAX_DELAY,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Execute once, never retry.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before the given attempt (0-indexed). The first attempt never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.initial_delay.as_millis() as f64
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        let final_ms = if self.jitter {
            capped_ms * (0.75 + jitter_fraction() * 0.5)
        } else {
            capped_ms
        };

        Duration::from_millis(final_ms as u64)
    }
}

/// Pseudo-random fraction in `[0, 1)` from the clock's sub-second nanos.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;

    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    f64::from(nanos) / 1_000_000_000.0
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub struct RetryResult<T> {
    pub value: Option<T>,
    pub attempts: u32,
    pub total_duration: Duration,
    pub last_error: Option<ServerError>,
}

impl<T> RetryResult<T> {
    pub fn is_success(&self) -> bool {
        self.value.is_some()
    }

    pub fn into_result(self) -> Result<T, ServerError> {
        match self.value {
            Some(v) => Ok(v),
            None => Err(self
                .last_error
                .unwrap_or_else(|| ServerError::internal("Retry failed with no error captured"))),
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
///
/// `label` identifies the call in log lines (for example `GET /api/card/7`).
pub async fn retry_async<F, Fut, T>(config: &RetryConfig, label: &str, operation: F) -> RetryResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ServerError>>,
{
    let start = Instant::now();
    let max_attempts = config.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let delay = config.delay_for_attempt(attempt);
            debug!(%label, attempt = attempt + 1, ?delay, "Retrying upstream call");
            sleep(delay).await;
        }

        match operation().await {
            Ok(value) => {
                return RetryResult {
                    value: Some(value),
                    attempts: attempt + 1,
                    total_duration: start.elapsed(),
                    last_error: None,
                };
            }
            Err(e) if !e.is_transient() => {
                debug!(%label, error = %e, "Permanent failure, not retrying");
                return RetryResult {
                    value: None,
                    attempts: attempt + 1,
                    total_duration: start.elapsed(),
                    last_error: Some(e),
                };
            }
            Err(e) => {
                warn!(
                    %label,
                    attempt = attempt + 1,
                    max_attempts,
                    error = %e,
                    "Transient upstream failure"
                );
                last_error = Some(e);
            }
        }
    }

    RetryResult {
        value: None,
        attempts: max_attempts,
        total_duration: start.elapsed(),
        last_error,
    }
}

/// [`retry_async`] collapsed into a plain `Result`.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    label: &str,
    operation: F,
) -> Result<T, ServerError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ServerError>>,
{
    retry_async(config, label, operation).await.into_result()
}
