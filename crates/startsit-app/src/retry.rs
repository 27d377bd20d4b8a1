// Retry with exponential backoff for upstream calls.
//
// Only transient failures (`Timeout`, `Unavailable`) are retried. Each
// attempt is additionally bounded by `attempt_timeout`, so a provider that
// never answers still surfaces as a timeout.

use std::future::Future;
use std::time::Duration;

use startsit_core::config::RetryConfig;
use startsit_core::UpstreamError;
use tokio::time::{sleep, timeout};
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay to sleep after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Run `f` until it succeeds, fails permanently, or attempts run out.
    /// `f` receives the 1-based attempt number.
    pub async fn run<F, Fut, T>(
        &self,
        operation: &str,
        attempt_timeout: Duration,
        mut f: F,
    ) -> Result<T, UpstreamError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut attempt = 1;
        loop {
            let outcome = match timeout(attempt_timeout, f(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(UpstreamError::timeout(operation, attempt_timeout)),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= self.max_attempts {
                return Err(err);
            }

            let delay = self.delay_after(attempt);
            warn!(operation, attempt, ?delay, error = %err, "upstream call failed, retrying");
            sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 6,
            ..policy()
        };
        assert_eq!(p.delay_after(1), Duration::from_secs(1));
        assert_eq!(p.delay_after(2), Duration::from_secs(2));
        assert_eq!(p.delay_after(3), Duration::from_secs(4));
        assert_eq!(p.delay_after(4), Duration::from_secs(8));
        assert_eq!(p.delay_after(5), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let start = tokio::time::Instant::now();

        let result = policy()
            .run("stats", Duration::from_secs(10), move |attempt| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(UpstreamError::unavailable("stats", "503"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let err = policy()
            .run("stats", Duration::from_secs(10), move |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(UpstreamError::timeout("stats", Duration::from_secs(10)))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, UpstreamError::Timeout { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let err = policy()
            .run("stats", Duration::from_secs(10), move |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(UpstreamError::rejected("stats", "404"))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, UpstreamError::Rejected { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_times_out_and_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = policy()
            .run("grading", Duration::from_secs(10), move |attempt| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    if attempt == 1 {
                        std::future::pending::<()>().await;
                    }
                    Ok("graded")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "graded");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
