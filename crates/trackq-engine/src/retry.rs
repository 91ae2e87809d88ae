//! Bounded exponential backoff for transient upstream failures.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use trackq_core::config::ExecutionSettings;
use trackq_core::Result;

/// Retry limits. `max_retries` counts re-attempts, so a call runs at most
/// `max_retries + 1` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&ExecutionSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &ExecutionSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            max_delay: Duration::from_millis(settings.retry_max_delay_ms),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before re-attempt number `retry` (1-based): base * 2^(retry-1),
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Outcome of a retried call plus how many attempts it took.
#[derive(Debug)]
pub struct Retried<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted. Sleeps between attempts use tokio time.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Retried<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op().await {
            Err(e) if e.is_retryable() && attempts <= policy.max_retries => {
                let delay = policy.delay_for(attempts);
                debug!(
                    attempt = attempts,
                    backoff_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
            result => return Retried { result, attempts },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;
    use trackq_core::Error;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(1_500),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_millis(500));
        assert_eq!(p.delay_for(2), Duration::from_millis(1_000));
        assert_eq!(p.delay_for(3), Duration::from_millis(1_500));
        assert_eq!(p.delay_for(30), Duration::from_millis(1_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_rate_limit_then_succeeds() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let out = retry_with_backoff(&policy(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::RateLimited("429".into()))
            } else {
                Ok("page")
            }
        })
        .await;

        assert_eq!(out.result.unwrap(), "page");
        assert_eq!(out.attempts, 3);
        assert_eq!(start.elapsed(), Duration::from_millis(1_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let out: Retried<()> = retry_with_backoff(&policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::UpstreamUnavailable("503".into()))
        })
        .await;

        assert!(matches!(out.result, Err(Error::UpstreamUnavailable(_))));
        assert_eq!(out.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_never_retried() {
        let calls = AtomicU32::new(0);
        let out: Retried<()> = retry_with_backoff(&policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::UpstreamRejected {
                status: 400,
                body: "bad filter".into(),
            })
        })
        .await;

        assert_eq!(out.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_endpoint_is_not_retried() {
        let out: Retried<()> = retry_with_backoff(&policy(), || async {
            Err(Error::EndpointUnsupported {
                endpoint: "/rest/api/3/search/jql".into(),
                status: 404,
            })
        })
        .await;
        assert_eq!(out.attempts, 1);
    }
}
