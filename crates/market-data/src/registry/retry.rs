//! Bounded retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::errors::{MarketDataError, RetryClass};

/// Retry policy shared by every provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    /// Upper bound on the generic backoff.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to each backoff.
    #[serde(rename = "jitter_ms", with = "duration_ms")]
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
        }
    }
}

/// Runs a provider call, retrying transient and rate-limited failures.
///
/// `Fatal` errors are returned after the first attempt. A provider-reported
/// cooldown on a `RateLimited` error wins over the computed backoff when it
/// is longer.
#[derive(Clone, Debug)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Backoff before retry number `attempt` (1-based), jitter included.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let exponential = self.policy.base_delay.saturating_mul(1u32 << exponent);

        let jitter_ms = self.policy.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };

        exponential.saturating_add(jitter).min(self.policy.max_delay)
    }

    /// Run `op` until it succeeds, fails fatally, or the attempts run out.
    ///
    /// The last error is returned when retries are exhausted.
    pub async fn run<T, F, Fut>(&self, provider: &str, mut op: F) -> Result<T, MarketDataError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let retry_class = error.retry_class();
            if retry_class == RetryClass::Fatal || attempt >= max_attempts {
                return Err(error);
            }

            let mut delay = self.backoff_for(attempt);
            if retry_class == RetryClass::RateLimited {
                if let Some(cooldown) = error.retry_after() {
                    delay = delay.max(cooldown);
                }
            }

            debug!(
                "Retry {}/{} for '{}' in {:?} after: {}",
                attempt,
                max_attempts - 1,
                provider,
                delay,
                error
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
