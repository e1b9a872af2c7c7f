//! Bounded retries with exponential backoff and jitter.
//!
//! Whether an error is retried is decided only by its [ErrorKind], so callers
//! choose the retryable kinds per call site through [RetryPolicy::retry_on].

use std::{
    fmt::Display,
    future::Future,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder, future::Retry};

use crate::{Classified, ErrorKind};

/// The backoff delay stops growing at this, and no `retry_after` hint is
/// waited out for longer.
const MAX_DELAY: Duration = Duration::from_secs(15 * 60);

/// How often and how patiently to retry a failing operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// The total number of attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// How long to wait before the second attempt.
    pub base_delay: Duration,
    /// The factor the delay grows by after each retry.
    pub multiplier: f64,
    /// The delay is scaled by a random factor in `1 ± jitter`, with the
    /// jitter clamped to `0..=1`.
    pub jitter: f64,
    /// The error kinds worth retrying. Every other kind fails immediately.
    pub retry_on: Vec<ErrorKind>,
}

impl RetryPolicy {
    /// The policy for requests to the bank's API: four attempts, one second
    /// base delay doubling each time, retrying transient upstream failures.
    pub fn api_default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.1,
            retry_on: vec![
                ErrorKind::RateLimited,
                ErrorKind::Server,
                ErrorKind::Connection,
                ErrorKind::Timeout,
            ],
        }
    }

    /// The policy for processing a webhook event: three attempts, retrying
    /// connection problems and rate limits.
    pub fn webhook_default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.1,
            retry_on: vec![
                ErrorKind::Connection,
                ErrorKind::Timeout,
                ErrorKind::RateLimited,
            ],
        }
    }

    /// Whether errors of `kind` should be retried.
    pub fn should_retry(&self, kind: ErrorKind) -> bool {
        self.retry_on.contains(&kind)
    }
}

/// Waits between attempts. Any [backoff::future::Sleeper] that can be shared
/// between tasks will do.
pub trait Sleeper: backoff::future::Sleeper + Send + Sync {}

impl<T> Sleeper for T where T: backoff::future::Sleeper + Send + Sync {}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl backoff::future::Sleeper for TokioSleeper {
    type Sleep = tokio::time::Sleep;

    fn sleep(&self, duration: Duration) -> Self::Sleep {
        tokio::time::sleep(duration)
    }
}

/// Lends a borrowed sleeper to [Retry], which wants one by value.
struct SleepOn<'a, S>(&'a S);

impl<S: backoff::future::Sleeper> backoff::future::Sleeper for SleepOn<'_, S> {
    type Sleep = S::Sleep;

    fn sleep(&self, duration: Duration) -> Self::Sleep {
        self.0.sleep(duration)
    }
}

/// Run `operation` until it succeeds, fails with an error kind the policy does
/// not retry, or has been attempted [RetryPolicy::max_attempts] times.
///
/// Between attempts the executor sleeps for the current delay scaled by the
/// jitter, then multiplies the delay by [RetryPolicy::multiplier]. An error
/// with a [Classified::retry_after] hint sleeps for the hint instead.
///
/// # Errors
/// Returns the first non-retryable error, or the last error once the attempts
/// are used up.
pub async fn retry<T, E, F, Fut, S>(
    policy: &RetryPolicy,
    sleeper: &S,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classified + Display,
    S: Sleeper,
{
    let max_attempts = policy.max_attempts.max(1);
    let attempt = AtomicU32::new(0);

    let attempt_operation = || {
        let current_attempt = attempt.fetch_add(1, Ordering::Relaxed) + 1;
        let result = operation();

        async move {
            result.await.map_err(|error| {
                if !policy.should_retry(error.kind()) {
                    tracing::debug!("{operation_name} failed with a non-retryable error: {error}");
                    return backoff::Error::permanent(error);
                }

                if current_attempt >= max_attempts {
                    tracing::error!(
                        "{operation_name} failed after {current_attempt} attempts: {error}"
                    );
                    return backoff::Error::permanent(error);
                }

                let retry_after = error.retry_after().map(|wait| wait.min(MAX_DELAY));
                backoff::Error::Transient {
                    err: error,
                    retry_after,
                }
            })
        }
    };

    let notify = |error: E, wait: Duration| {
        tracing::warn!(
            "{operation_name} failed (attempt {} of {max_attempts}), retrying in {wait:?}: {error}",
            attempt.load(Ordering::Relaxed)
        );
    };

    Retry::new(
        SleepOn(sleeper),
        exponential_backoff(policy),
        notify,
        attempt_operation,
    )
    .await
}

fn exponential_backoff(policy: &RetryPolicy) -> ExponentialBackoff {
    let jitter = if policy.jitter.is_nan() {
        0.0
    } else {
        policy.jitter.clamp(0.0, 1.0)
    };

    ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.base_delay)
        .with_randomization_factor(jitter)
        .with_multiplier(policy.multiplier)
        .with_max_interval(MAX_DELAY)
        .with_max_elapsed_time(None)
        .build()
}

#[cfg(test)]
mod retry_tests {
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use crate::{
        ApiError, ErrorKind,
        retry::{RetryPolicy, retry},
        test_utils::RecordingSleeper,
    };

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.0,
            retry_on: vec![ErrorKind::Connection, ErrorKind::RateLimited],
        }
    }

    #[tokio::test]
    async fn succeeds_after_failures_with_one_sleep_per_failure() {
        let sleeper = RecordingSleeper::default();
        let attempts = AtomicU32::new(0);

        let result = retry(&policy(4), &sleeper, "test", || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(ApiError::Connection("reset".to_owned()))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(sleeper.sleeps().len(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let sleeper = RecordingSleeper::default();
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = retry(&policy(3), &sleeper, "test", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::Connection(format!(
                "reset {}",
                attempts.load(Ordering::SeqCst)
            )))
        })
        .await;

        assert_eq!(result, Err(ApiError::Connection("reset 3".to_owned())));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(sleeper.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_on_first_attempt() {
        let sleeper = RecordingSleeper::default();
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = retry(&policy(5), &sleeper, "test", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::Auth(401))
        })
        .await;

        assert_eq!(result, Err(ApiError::Auth(401)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn delay_grows_by_multiplier() {
        let sleeper = RecordingSleeper::default();

        let _: Result<(), _> = retry(&policy(4), &sleeper, "test", || async {
            Err(ApiError::Connection("reset".to_owned()))
        })
        .await;

        assert_eq!(
            sleeper.sleeps(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[tokio::test]
    async fn rate_limit_waits_at_least_retry_after() {
        let sleeper = RecordingSleeper::default();
        let attempts = AtomicU32::new(0);

        let result = retry(&policy(2), &sleeper, "test", || async {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ApiError::RateLimited {
                    retry_after: Duration::from_secs(30),
                })
            } else {
                Ok(())
            }
        })
        .await;

        assert_eq!(result, Ok(()));
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(30)]);
    }

    #[tokio::test]
    async fn retry_after_is_capped_at_fifteen_minutes() {
        let sleeper = RecordingSleeper::default();
        let attempts = AtomicU32::new(0);

        let result = retry(&policy(2), &sleeper, "test", || async {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ApiError::RateLimited {
                    retry_after: Duration::from_secs(60 * 60),
                })
            } else {
                Ok(())
            }
        })
        .await;

        assert_eq!(result, Ok(()));
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(15 * 60)]);
    }

    #[tokio::test]
    async fn jitter_stays_within_bounds() {
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy {
            jitter: 0.5,
            ..policy(6)
        };

        let _: Result<(), _> = retry(&policy, &sleeper, "test", || async {
            Err(ApiError::Connection("reset".to_owned()))
        })
        .await;

        let sleeps = sleeper.sleeps();
        assert_eq!(sleeps.len(), 5);
        let mut delay = 1.0;
        for sleep in sleeps {
            let seconds = sleep.as_secs_f64();
            assert!(
                (delay * 0.5 - 1e-6..=delay * 1.5 + 1e-6).contains(&seconds),
                "{seconds} is outside the jitter range for {delay}"
            );
            delay *= 2.0;
        }
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let sleeper = RecordingSleeper::default();
        let attempts = AtomicU32::new(0);

        let result = retry(&policy(0), &sleeper, "test", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ApiError>(())
        })
        .await;

        assert_eq!(result, Ok(()));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_policies() {
        let api = RetryPolicy::api_default();
        let webhook = RetryPolicy::webhook_default();

        assert_eq!(api.max_attempts, 4);
        assert!(api.should_retry(ErrorKind::Server));
        assert!(!api.should_retry(ErrorKind::Auth));
        assert!(!api.should_retry(ErrorKind::NotFound));
        assert_eq!(webhook.max_attempts, 3);
        assert!(!webhook.should_retry(ErrorKind::Server));
        assert!(webhook.should_retry(ErrorKind::RateLimited));
    }
}
