//! Retry with exponential backoff and jitter

use modelcast_core::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Backoff policy for transient store failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Delay before the first retry (milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single delay (milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Random spread applied to each delay, 0.0 - 1.0
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl RetryConfig {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Set the retry budget
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base and maximum delays
    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = base.as_millis() as u64;
        self.max_delay_ms = max.as_millis() as u64;
        self
    }

    /// Delay to wait before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exp = 2u64.saturating_pow(attempt.min(32) as u32);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(exp)
            .min(self.max_delay_ms);

        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay_ms == 0 {
            return Duration::from_millis(delay_ms);
        }

        let spread = (delay_ms as f64 * jitter) as i64;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis((delay_ms as i64 + offset).max(0) as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> usize {
    10
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_jitter() -> f64 {
    0.25
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// retry budget is spent.
///
/// `on_retry` is called before each backoff sleep. Cancellation is checked
/// while the operation runs and while sleeping, and yields
/// [`Error::Cancelled`].
pub async fn retry_transient<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    what: &str,
    mut on_retry: impl FnMut(&Error),
    mut op: F,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = op(attempt) => result,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() || attempt >= config.max_retries => return Err(e),
            Err(e) => {
                let delay = config.delay_for(attempt);
                warn!(
                    what,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                on_retry(&e);

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        attempt += 1;
    }
}
