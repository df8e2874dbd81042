//! Retry policy for remote calls.
//!
//! Every remote call site wraps its request in a [`RetryPolicy`]. Transient
//! failures ([`crate::StoreError::is_retryable`]) are repeated after a delay;
//! anything else is returned at once. A policy may also cap the total time
//! spent retrying, after which the last error is returned.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::error::Result;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failure.
    Fixed(Duration),
    /// Doubling delay starting at `base`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

/// How often and how patiently a remote call is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. `None` retries forever.
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
    /// Time after the first attempt past which no retry is started.
    pub max_elapsed: Option<Duration>,
}

impl RetryPolicy {
    /// Retry forever with a fixed delay.
    pub const fn unbounded_fixed(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Fixed(delay),
            max_elapsed: None,
        }
    }

    /// Give up after `max_attempts` attempts.
    pub const fn bounded(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff,
            max_elapsed: None,
        }
    }

    /// Stop retrying once `limit` has passed since the first attempt.
    pub const fn with_max_elapsed(mut self, limit: Duration) -> Self {
        self.max_elapsed = Some(limit);
        self
    }

    /// A single attempt, no retry.
    pub const fn none() -> Self {
        Self::bounded(1, Backoff::Fixed(Duration::ZERO))
    }

    /// Delay before attempt `attempt + 1`, where `attempt` counts from 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let shift = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << shift).min(max)
            }
        }
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    if self.max_attempts.is_some_and(|max| attempt >= max) {
                        warn!(op, attempt, error = %e, "giving up");
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt);
                    if self
                        .max_elapsed
                        .is_some_and(|limit| started.elapsed() + delay > limit)
                    {
                        warn!(op, attempt, error = %e, "retry time exhausted, giving up");
                        return Err(e);
                    }
                    warn!(op, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded_fixed(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::unbounded_fixed(Duration::from_secs(5));

        let value = policy
            .run("flaky", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 3 {
                    Err(StoreError::Transport("reset".into()))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_returns_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::default();

        let err = policy
            .run("denied", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StoreError::Unauthorized("bad key".into()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Unauthorized(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_policy_stops() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::bounded(3, Backoff::Fixed(Duration::from_millis(10)));

        let err = policy
            .run("down", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StoreError::Http {
                    status: 503,
                    body: String::new(),
                })
            })
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_elapsed_stops_unbounded_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::unbounded_fixed(Duration::from_secs(5))
            .with_max_elapsed(Duration::from_secs(12));
        let started = Instant::now();

        let err = policy
            .run("stuck", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StoreError::Rpc("deadlock detected".into()))
            })
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy::bounded(
            10,
            Backoff::Exponential {
                base: Duration::from_secs(2),
                max: Duration::from_secs(60),
            },
        );
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(32));
        assert_eq!(policy.delay_for(6), Duration::from_secs(60));
        assert_eq!(policy.delay_for(40), Duration::from_secs(60));
    }

    proptest::proptest! {
        #[test]
        fn prop_exponential_delay_is_monotonic_and_capped(
            base_ms in 1u64..5_000,
            max_ms in 1u64..600_000,
            attempt in 1u32..64,
        ) {
            let max = Duration::from_millis(max_ms);
            let policy = RetryPolicy::bounded(
                u32::MAX,
                Backoff::Exponential { base: Duration::from_millis(base_ms), max },
            );
            proptest::prop_assert!(policy.delay_for(attempt) <= max);
            proptest::prop_assert!(policy.delay_for(attempt) <= policy.delay_for(attempt + 1));
        }
    }
}
