//! Bounded exponential backoff for transient provider failures.

use std::future::Future;
use std::time::Duration;

use offramp_types::ProviderError;
use rand::Rng;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one; at least 1
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Scales `delay` by a random factor in [0.5, 1.0] so concurrent retries spread out.
fn jittered(delay: Duration) -> Duration {
    delay.mul_f64(rand::rng().random_range(0.5..=1.0))
}

/// Runs `op` until it succeeds, fails permanently, or attempts run out.
///
/// Only transient errors are retried; a request that may have reached the
/// provider is never sent twice.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    retry_when(policy, what, ProviderError::is_transient, op).await
}

/// Like [`retry_transient`], but also repeats requests that got no answer.
/// For reads and for calls the provider deduplicates.
pub async fn retry_idempotent<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    retry_when(
        policy,
        what,
        |err| err.is_transient() || err.is_unconfirmed(),
        op,
    )
    .await
}

async fn retry_when<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    retryable: impl Fn(&ProviderError) -> bool,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if retryable(&err) && attempt < policy.max_attempts => {
                let delay = jittered(policy.delay_after(attempt));
                warn!(
                    what,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient provider error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn delays_double_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(250));
        assert_eq!(policy.delay_after(2), Duration::from_millis(500));
        assert_eq!(policy.delay_after(3), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(10), Duration::from_secs(5));
        assert_eq!(policy.delay_after(64), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_half_and_full_delay() {
        for _ in 0..100 {
            let delay = jittered(Duration::from_millis(400));
            assert!(delay >= Duration::from_millis(200) && delay <= Duration::from_millis(400));
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(&fast(3), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::Http {
                    status: 503,
                    body: "busy".into(),
                })
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_return_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_transient(&fast(5), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Http {
                status: 400,
                body: "bad iban".into(),
            })
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Http { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_transient(&fast(2), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Transport("connection refused".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unanswered_requests_are_sent_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_transient(&fast(3), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::NoResponse("operation timed out".into()))
        })
        .await;

        assert!(matches!(result, Err(ProviderError::NoResponse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn idempotent_calls_repeat_unanswered_requests() {
        let calls = AtomicU32::new(0);
        let result = retry_idempotent(&fast(3), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ProviderError::NoResponse("operation timed out".into()))
            } else {
                Ok("paid")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "paid");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
