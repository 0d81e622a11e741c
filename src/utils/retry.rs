//! Retry with exponential backoff and jitter
//!
//! Used around Bedrock and Stripe calls, which fail transiently under
//! throttling.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, use_jitter: bool) -> Self {
        self.use_jitter = use_jitter;
        self
    }

    /// Delay before retry number `attempt` (0-indexed), capped at `max_delay`.
    /// Jitter adds up to the same amount again.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = (self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32))
            .min(self.max_delay.as_millis() as f64);

        let delay_ms = if self.use_jitter && base_ms > 0.0 {
            base_ms + rand::thread_rng().gen_range(0.0..base_ms)
        } else {
            base_ms
        };

        Duration::from_millis(delay_ms as u64)
    }

    /// Bedrock: throttling needs longer pauses
    pub fn nova() -> Self {
        Self::default()
            .with_initial_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(8))
    }

    /// Stripe: quick retries, few of them
    pub fn stripe() -> Self {
        Self::default()
            .with_max_retries(2)
            .with_initial_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
    }
}

/// Outcome of `retry_with_backoff`
#[derive(Debug)]
pub struct RetryResult<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
    pub total_delay: Duration,
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// runs out of retries.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    config: &RetryConfig,
    is_retryable: R,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut attempts = 0;
    let mut total_delay = Duration::ZERO;

    loop {
        attempts += 1;

        match operation().await {
            Ok(value) => {
                return RetryResult {
                    result: Ok(value),
                    attempts,
                    total_delay,
                }
            }
            Err(err) if attempts > config.max_retries || !is_retryable(&err) => {
                return RetryResult {
                    result: Err(err),
                    attempts,
                    total_delay,
                }
            }
            Err(_) => {
                let delay = config.calculate_delay(attempts - 1);
                total_delay += delay;
                tracing::debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, "Retrying after transient failure");
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryConfig {
        RetryConfig::default()
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[test]
    fn test_delay_growth_is_capped() {
        let config = RetryConfig::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500))
            .with_jitter(false);

        assert_eq!(config.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_double() {
        let config = RetryConfig::default().with_initial_delay(Duration::from_millis(100));
        let delay = config.calculate_delay(0);
        assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let outcome = retry_with_backoff(&fast(), |_: &String| true, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("throttled".to_string())
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(outcome.result.unwrap(), 7);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let outcome = retry_with_backoff(&fast().with_max_retries(2), |_: &String| true, || async {
            Err::<(), _>("down".to_string())
        })
        .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let outcome = retry_with_backoff(&fast(), |e: &String| e != "invalid", || async {
            Err::<(), _>("invalid".to_string())
        })
        .await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.total_delay, Duration::ZERO);
    }

    #[test]
    fn test_presets() {
        assert_eq!(RetryConfig::nova().initial_delay, Duration::from_millis(500));
        assert_eq!(RetryConfig::stripe().max_retries, 2);
    }
}
