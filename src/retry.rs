//! Resilient call wrapper for external services.
//!
//! Every metadata-service and chat-platform call runs through [`call`] with
//! an explicit [`RetryPolicy`]: transient failures back off and retry within
//! the attempt budget, rate limits honor the server-provided delay,
//! authentication loss triggers exactly one recovery attempt, and fatal
//! errors surface immediately.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// How a failed external call should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection resets, timeouts, 5xx responses: back off and retry.
    Transient,
    /// Platform rate limit; prefers the server-provided delay when known.
    RateLimited(Option<Duration>),
    /// Credentials rejected; recoverable once per call.
    AuthLost,
    /// Not retryable.
    Fatal,
}

/// Maps a domain error onto a retry classification.
pub trait Classify {
    fn classify(&self) -> ErrorClass;
}

/// Re-establishes external-service credentials after an authentication loss.
///
/// Implementations may fall back to an unauthenticated session; returning
/// `false` means no usable session of any kind could be established.
pub trait Recovery: Send + Sync {
    fn recover(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;
}

/// Attempt budget and backoff shape for one call site.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total invocations of the operation, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Bounded exponential backoff: `base * 2^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Terminal outcome of a wrapped call that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("retries exhausted after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: E },

    #[error("authentication lost and not recovered: {source}")]
    AuthenticationFailed { source: E },

    #[error(transparent)]
    Fatal(E),
}

/// Execute `op` under `policy`, classifying each failure.
///
/// `recovery` handles authentication loss: the session is re-established at
/// most once, after which the operation gets one additional try that does
/// not consume the transient budget. A second authentication failure — or a
/// recovery that cannot produce any session — is surfaced as
/// [`RetryError::AuthenticationFailed`].
pub async fn call<T, E, F, Fut>(
    policy: &RetryPolicy,
    recovery: Option<&dyn Recovery>,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Classify + std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut failures = 0u32;
    let mut recovered = false;

    loop {
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        match error.classify() {
            ErrorClass::Fatal => return Err(RetryError::Fatal(error)),
            ErrorClass::AuthLost => {
                if recovered {
                    return Err(RetryError::AuthenticationFailed { source: error });
                }
                let Some(recovery) = recovery else {
                    return Err(RetryError::AuthenticationFailed { source: error });
                };
                tracing::warn!(%error, "authentication lost, re-establishing session");
                recovered = true;
                if !recovery.recover().await {
                    return Err(RetryError::AuthenticationFailed { source: error });
                }
            }
            class @ (ErrorClass::Transient | ErrorClass::RateLimited(_)) => {
                failures += 1;
                if failures >= policy.max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: failures,
                        source: error,
                    });
                }
                let delay = match class {
                    ErrorClass::RateLimited(Some(after)) => after,
                    _ => policy.backoff(failures),
                };
                tracing::warn!(%error, attempt = failures, ?delay, "external call failed, backing off");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("rate limited")]
        RateLimited,
        #[error("auth lost")]
        AuthLost,
        #[error("fatal")]
        Fatal,
    }

    impl Classify for TestError {
        fn classify(&self) -> ErrorClass {
            match self {
                TestError::Transient => ErrorClass::Transient,
                TestError::RateLimited => {
                    ErrorClass::RateLimited(Some(Duration::from_millis(1)))
                }
                TestError::AuthLost => ErrorClass::AuthLost,
                TestError::Fatal => ErrorClass::Fatal,
            }
        }
    }

    struct CountingRecovery {
        calls: AtomicU32,
        succeed: bool,
    }

    impl CountingRecovery {
        fn new(succeed: bool) -> Self {
            Self {
                calls: AtomicU32::new(0),
                succeed,
            }
        }
    }

    impl Recovery for CountingRecovery {
        fn recover(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let succeed = self.succeed;
            Box::pin(async move { succeed })
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn transient_failures_below_budget_succeed() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<u32, RetryError<TestError>> =
            call(&fast_policy(), None, move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TestError::Transient)
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.expect("third attempt should succeed"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn budget_exhaustion_surfaces_attempt_count() {
        let result: Result<(), RetryError<TestError>> =
            call(&fast_policy(), None, || async { Err(TestError::Transient) }).await;

        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limits_count_against_the_same_budget() {
        let result: Result<(), RetryError<TestError>> =
            call(&fast_policy(), None, || async {
                Err(TestError::RateLimited)
            })
            .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), RetryError<TestError>> =
            call(&fast_policy(), None, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Fatal(TestError::Fatal))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn auth_loss_recovers_exactly_once_then_succeeds() {
        let recovery = CountingRecovery::new(true);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<&str, RetryError<TestError>> =
            call(&fast_policy(), Some(&recovery), move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(TestError::AuthLost)
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.expect("post-recovery retry should succeed"), "ok");
        assert_eq!(recovery.calls.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_auth_loss_is_terminal_without_second_recovery() {
        let recovery = CountingRecovery::new(true);

        let result: Result<(), RetryError<TestError>> =
            call(&fast_policy(), Some(&recovery), || async {
                Err(TestError::AuthLost)
            })
            .await;

        assert!(matches!(
            result,
            Err(RetryError::AuthenticationFailed { .. })
        ));
        assert_eq!(recovery.calls.load(Ordering::SeqCst), 1, "never two recoveries");
    }

    #[tokio::test]
    async fn failed_recovery_is_terminal_immediately() {
        let recovery = CountingRecovery::new(false);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), RetryError<TestError>> =
            call(&fast_policy(), Some(&recovery), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::AuthLost) }
            })
            .await;

        assert!(matches!(
            result,
            Err(RetryError::AuthenticationFailed { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no retry without a session");
    }

    #[tokio::test]
    async fn auth_loss_without_recovery_hook_is_terminal() {
        let result: Result<(), RetryError<TestError>> =
            call(&fast_policy(), None, || async { Err(TestError::AuthLost) }).await;

        assert!(matches!(
            result,
            Err(RetryError::AuthenticationFailed { .. })
        ));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(8), Duration::from_secs(30));
    }
}
