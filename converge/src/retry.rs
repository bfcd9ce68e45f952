//! Bounded-duration retry of a single remote call
//!
//! [`execute`] runs an operation until it succeeds, fails with a non-retryable
//! error, exhausts its [`RetryPolicy::max_duration`] budget, or the caller's
//! [`Context`] is cancelled. The loop never starts a new attempt after the
//! budget is spent, so the worst case is the budget plus one in-flight call.

use crate::context::Context;
use crate::error::{BoxError, Classify, ConvergeError, ErrorClass, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Budget for calls that only observe remote state.
pub const READ_RETRY_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Budget for calls that mutate remote state.
pub const WRITE_RETRY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Delay curve between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { initial: Duration, max: Duration },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based: the delay after the first failure is attempt 1).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let factor = 1u32 << attempt.saturating_sub(1).min(20);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

type Classifier<E> = Arc<dyn Fn(&E) -> ErrorClass + Send + Sync>;

/// Governs one bounded retry loop. Stateless; build one per call site.
pub struct RetryPolicy<E> {
    max_duration: Duration,
    backoff: Backoff,
    classify: Classifier<E>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_duration: self.max_duration,
            backoff: self.backoff,
            classify: Arc::clone(&self.classify),
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_duration", &self.max_duration)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl<E> RetryPolicy<E> {
    pub fn new<F>(max_duration: Duration, classify: F) -> Self
    where
        F: Fn(&E) -> ErrorClass + Send + Sync + 'static,
    {
        Self {
            max_duration,
            backoff: Backoff::default(),
            classify: Arc::new(classify),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    pub fn classify(&self, error: &E) -> ErrorClass {
        (self.classify)(error)
    }
}

impl<E: Classify + 'static> RetryPolicy<E> {
    /// Policy that classifies through the error type's own [`Classify`] impl.
    pub fn classified(max_duration: Duration) -> Self {
        Self::new(max_duration, |e: &E| e.class())
    }

    pub fn read() -> Self {
        Self::classified(READ_RETRY_TIMEOUT)
    }

    pub fn write() -> Self {
        Self::classified(WRITE_RETRY_TIMEOUT)
    }
}

/// Run `operation` under `policy`.
///
/// Retryable errors are absorbed until the budget runs out and then surface as
/// [`ConvergeError::Timeout`] wrapping the last one. Fatal and not-found errors
/// return immediately. Cancellation of `ctx` aborts the in-flight attempt or
/// the pending sleep with [`ConvergeError::Cancelled`].
pub async fn execute<T, E, F, Fut>(
    ctx: &Context,
    policy: &RetryPolicy<E>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let start = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        if ctx.is_cancelled() {
            return Err(ConvergeError::Cancelled);
        }

        attempts += 1;
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(ConvergeError::Cancelled),
            outcome = operation() => outcome,
        };

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let class = policy.classify(&error);
        if class != ErrorClass::Retryable {
            tracing::debug!(
                log_id = ctx.log_id(),
                "Attempt {} failed with {:?} error: {}",
                attempts,
                class,
                error
            );
            return Err(ConvergeError::from_remote(class, error));
        }

        let elapsed = start.elapsed();
        let remaining = policy.max_duration.saturating_sub(elapsed);
        if remaining.is_zero() {
            tracing::warn!(
                log_id = ctx.log_id(),
                "Giving up after {} attempts in {:?}: {}",
                attempts,
                elapsed,
                error
            );
            return Err(ConvergeError::Timeout {
                elapsed,
                attempts,
                last_error: Some(Box::new(error) as BoxError),
            });
        }

        let delay = policy.backoff.delay_for_attempt(attempts).min(remaining);
        tracing::warn!(
            log_id = ctx.log_id(),
            "Retryable error on attempt {}, retrying after {}ms: {}",
            attempts,
            delay.as_millis(),
            error
        );

        tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(ConvergeError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::error::Error as _;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error)]
    enum FakeError {
        #[error("rate limited")]
        RateLimited,
        #[error("invalid parameter")]
        InvalidParameter,
        #[error("resource not found")]
        NotFound,
    }

    impl Classify for FakeError {
        fn class(&self) -> ErrorClass {
            match self {
                FakeError::RateLimited => ErrorClass::Retryable,
                FakeError::InvalidParameter => ErrorClass::Fatal,
                FakeError::NotFound => ErrorClass::NotFound,
            }
        }
    }

    #[test]
    fn default_backoff_doubles_and_caps() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_millis(800));
        assert_eq!(backoff.delay_for_attempt(20), Duration::from_secs(10));
        assert_eq!(backoff.delay_for_attempt(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let backoff = Backoff::Fixed(Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(9), Duration::from_secs(1));
    }

    #[test]
    fn default_budgets() {
        assert_eq!(RetryPolicy::<FakeError>::read().max_duration(), READ_RETRY_TIMEOUT);
        assert_eq!(RetryPolicy::<FakeError>::write().max_duration(), WRITE_RETRY_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn success_runs_once() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::<FakeError>::classified(Duration::from_secs(10));

        let value = execute(&Context::new(), &policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FakeError>(42)
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_errors_time_out_within_budget() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::<FakeError>::classified(Duration::from_secs(2));
        let start = Instant::now();

        let err = execute(&Context::new(), &policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(FakeError::RateLimited)
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.source().unwrap().to_string(), "rate limited");
        assert!(calls.load(Ordering::SeqCst) > 1);
        assert!(start.elapsed() <= Duration::from_secs(2));
        assert!(start.elapsed() >= Duration::from_millis(1900));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_attempts_exactly_once() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::<FakeError>::classified(Duration::ZERO);

        let err = execute(&Context::new(), &policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(FakeError::RateLimited)
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_short_circuits() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::<FakeError>::classified(Duration::from_secs(3600));
        let start = Instant::now();

        let err = execute(&Context::new(), &policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(FakeError::InvalidParameter)
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::<FakeError>::classified(Duration::from_secs(60));

        let err = execute(&Context::new(), &policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(FakeError::NotFound)
        })
        .await
        .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_errors() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::<FakeError>::classified(Duration::from_secs(60))
            .with_backoff(Backoff::Fixed(Duration::from_secs(1)));
        let start = Instant::now();

        let value = execute(&Context::new(), &policy, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(FakeError::RateLimited)
            } else {
                Ok("done")
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_classifier_overrides_error_class() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(Duration::from_secs(5), |_: &FakeError| ErrorClass::Fatal);

        let err = execute(&Context::new(), &policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(FakeError::RateLimited)
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let ctx = Context::new().with_timeout(Duration::from_millis(500));
        let policy = RetryPolicy::<FakeError>::classified(Duration::from_secs(3600))
            .with_backoff(Backoff::Fixed(Duration::from_secs(60)));

        let err = execute(&ctx, &policy, || async { Err::<(), _>(FakeError::RateLimited) })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn cancelled_context_never_calls_operation() {
        let ctx = Context::new();
        ctx.cancel();
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::<FakeError>::read();

        let err = execute(&ctx, &policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FakeError>(())
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
