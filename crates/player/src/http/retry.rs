// Retry strategies for HTTP requests: a fixed-delay default and exponential backoff.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{PlayerError, Result};

/// Decides whether a failed request is tried again and how long to wait first.
///
/// Non-2xx responses reach the strategy as [`PlayerError::HttpStatus`].
pub trait RetryStrategy: Send + Sync {
    /// `attempt` is the 0-indexed number of the attempt that just failed.
    fn should_retry(&self, attempt: u32, error: &PlayerError) -> bool;

    fn delay(&self, attempt: u32) -> Duration;
}

/// Retries any failure a fixed number of times with a constant delay.
#[derive(Debug, Clone)]
pub struct SimpleRetryStrategy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for SimpleRetryStrategy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryStrategy for SimpleRetryStrategy {
    fn should_retry(&self, attempt: u32, error: &PlayerError) -> bool {
        !matches!(error, PlayerError::Cancelled) && attempt < self.retries
    }

    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Doubling delays for transient failures, for servers that throttle or flap.
///
/// Client errors other than 429 are not retried. The n-th retry waits
/// `initial_delay * 2^n` plus up to half of `initial_delay` of jitter, never longer than
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct BackoffRetryStrategy {
    pub retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for BackoffRetryStrategy {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl RetryStrategy for BackoffRetryStrategy {
    fn should_retry(&self, attempt: u32, error: &PlayerError) -> bool {
        attempt < self.retries && error.is_retryable()
    }

    fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let delay = self.initial_delay.saturating_mul(factor).min(self.max_delay);
        let headroom = self.max_delay.saturating_sub(delay).min(self.initial_delay / 2);
        if !self.jitter || headroom.is_zero() {
            return delay;
        }
        delay + headroom.mul_f64(rand::rng().random_range(0.0..1.0))
    }
}

/// Run `operation` until it succeeds, the strategy gives up, or `token` is cancelled.
///
/// The closure receives the 0-indexed attempt number.
pub async fn retry_with_strategy<S, F, Fut, T>(
    strategy: &S,
    token: &CancellationToken,
    operation: F,
) -> Result<T>
where
    S: RetryStrategy + ?Sized,
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        if token.is_cancelled() {
            return Err(PlayerError::Cancelled);
        }

        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !strategy.should_retry(attempt, &err) {
            return Err(err);
        }

        let delay = strategy.delay(attempt);
        warn!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after transient error"
        );
        tokio::select! {
            _ = token.cancelled() => {
                return Err(PlayerError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
