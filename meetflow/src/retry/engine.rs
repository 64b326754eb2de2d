//! Retry engine.
//!
//! Runs an operation until it succeeds, the failure is classified permanent,
//! the retry budget is spent, or the abort handle fires. Attempts are strictly
//! sequential and the sleep between them follows [`Backoff`].

use super::backoff::Backoff;
use super::classifier::is_retryable_error;
use crate::cancellation::CancellationToken;
use crate::errors::{AbortError, RetryError, RetryExhaustedError};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Predicate deciding whether an error may be retried.
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Observer invoked before each retry with `(error, attempt, delay)`.
///
/// `attempt` is the one-based number of the attempt that just failed.
pub type RetryObserver<E> = Arc<dyn Fn(&E, u32, Duration) + Send + Sync>;

/// Options for [`with_retry`].
pub struct RetryOptions<E> {
    /// Retries after the first attempt; at most `max_retries + 1` attempts run.
    pub max_retries: u32,
    /// Delay schedule between attempts.
    pub backoff: Backoff,
    should_retry: RetryPredicate<E>,
    on_retry: Option<RetryObserver<E>>,
    signal: Option<Arc<CancellationToken>>,
}

impl<E: fmt::Display> Default for RetryOptions<E> {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::default(),
            should_retry: Arc::new(|e: &E| is_retryable_error(e)),
            on_retry: None,
            signal: None,
        }
    }
}

impl<E: fmt::Display> RetryOptions<E> {
    /// Creates options with the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<E> RetryOptions<E> {
    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.backoff.initial_delay = delay;
        self
    }

    /// Sets the maximum delay before jitter.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.backoff.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff.multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.backoff.jitter = jitter;
        self
    }

    /// Replaces the whole backoff schedule.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Replaces the retryability predicate.
    #[must_use]
    pub fn with_should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Sets the per-retry observer. Panics inside it are logged and ignored.
    #[must_use]
    pub fn with_on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(&E, u32, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// Sets the abort handle.
    #[must_use]
    pub fn with_signal(mut self, signal: Arc<CancellationToken>) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Returns the abort handle, if any.
    #[must_use]
    pub fn signal(&self) -> Option<&Arc<CancellationToken>> {
        self.signal.as_ref()
    }

    fn aborted_reason(&self) -> Option<String> {
        self.signal
            .as_ref()
            .filter(|s| s.is_cancelled())
            .map(|s| s.reason().unwrap_or_else(|| "aborted".to_string()))
    }

    fn notify_retry(&self, error: &E, attempt: u32, delay: Duration) {
        let Some(observer) = self.on_retry.as_ref() else {
            return;
        };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            observer(error, attempt, delay);
        }));
        if let Err(e) = result {
            warn!(attempt, "Retry observer panicked: {:?}", e);
        }
    }
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            backoff: self.backoff,
            should_retry: Arc::clone(&self.should_retry),
            on_retry: self.on_retry.clone(),
            signal: self.signal.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("has_on_retry", &self.on_retry.is_some())
            .field("signal", &self.signal)
            .finish()
    }
}

/// Executes an operation with retry logic.
///
/// The first success is returned immediately. A failure classified permanent
/// on the very first attempt is returned unchanged as
/// [`RetryError::NotRetryable`]; later permanent failures and an exhausted
/// budget produce [`RetryError::Exhausted`]. If the abort handle fires before
/// an attempt or during a sleep, [`RetryError::Aborted`] is returned at once.
pub async fn with_retry<T, E, F, Fut>(
    mut operation: F,
    options: &RetryOptions<E>,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt: u32 = 0;
    let mut last_error: Option<E> = None;

    loop {
        if let Some(reason) = options.aborted_reason() {
            return Err(RetryError::Aborted(AbortError {
                reason,
                attempts: attempt,
                last_error,
            }));
        }

        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        attempt += 1;

        if !(options.should_retry)(&error) {
            if attempt == 1 {
                debug!(error = %error, "Error is not retryable");
                return Err(RetryError::NotRetryable(error));
            }
            return Err(RetryError::Exhausted(RetryExhaustedError::new(attempt, error)));
        }

        if attempt > options.max_retries {
            warn!(attempts = attempt, error = %error, "Retries exhausted");
            return Err(RetryError::Exhausted(RetryExhaustedError::new(attempt, error)));
        }

        let delay = options.backoff.delay(attempt - 1);
        debug!(
            attempt,
            max_retries = options.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying after error"
        );
        options.notify_retry(&error, attempt, delay);

        match options.signal.as_ref() {
            Some(signal) => {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = signal.cancelled() => {
                        return Err(RetryError::Aborted(AbortError {
                            reason: signal.reason().unwrap_or_else(|| "aborted".to_string()),
                            attempts: attempt,
                            last_error: Some(error),
                        }));
                    }
                }
            }
            None => tokio::time::sleep(delay).await,
        }

        last_error = Some(error);
    }
}

/// An operation bound to retry options.
///
/// Each [`Retryable::call`] runs the operation through [`with_retry`].
pub struct Retryable<F, E> {
    operation: F,
    options: RetryOptions<E>,
}

/// Wraps an operation so every call is retried with `options`.
pub fn make_retryable<F, E>(operation: F, options: RetryOptions<E>) -> Retryable<F, E> {
    Retryable { operation, options }
}

impl<F, E> Retryable<F, E> {
    /// Returns the options used for each call.
    #[must_use]
    pub fn options(&self) -> &RetryOptions<E> {
        &self.options
    }

    /// Runs the wrapped operation with retries.
    pub async fn call<T, Fut>(&self) -> Result<T, RetryError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        with_retry(&self.operation, &self.options).await
    }
}

impl<F, E> fmt::Debug for Retryable<F, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retryable")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_options() -> RetryOptions<String> {
        RetryOptions::new()
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[test]
    fn test_default_options() {
        let options: RetryOptions<String> = RetryOptions::default();
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.backoff, Backoff::default());
        assert!(options.signal().is_none());
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, RetryError<String>> = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            },
            &fast_options(),
        )
        .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds_with_exact_delays() {
        let calls = AtomicU32::new(0);
        let delays = Arc::new(Mutex::new(Vec::new()));
        let recorded = delays.clone();
        let options = RetryOptions::new()
            .with_max_retries(3)
            .with_initial_delay(Duration::from_millis(100))
            .with_jitter(false)
            .with_on_retry(move |_e: &String, _attempt, delay| recorded.lock().push(delay));

        let start = tokio::time::Instant::now();
        let result = with_retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(format!("network error #{n}"))
                    } else {
                        Ok(n)
                    }
                }
            },
            &options,
        )
        .await;

        assert_eq!(result.ok(), Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *delays.lock(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(310), "{elapsed:?}");
    }

    #[tokio::test]
    async fn test_attempts_bounded_by_max_retries() {
        for max_retries in 0..4 {
            let calls = AtomicU32::new(0);
            let options = fast_options().with_max_retries(max_retries);
            let result: Result<(), _> = with_retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("status: 503".to_string()) }
                },
                &options,
            )
            .await;

            let err = result.unwrap_err();
            assert!(err.is_exhausted());
            assert_eq!(err.attempts(), max_retries + 1);
            assert_eq!(calls.load(Ordering::SeqCst), max_retries + 1);
            assert_eq!(err.last_error().map(String::as_str), Some("status: 503"));
        }
    }

    #[tokio::test]
    async fn test_non_retryable_first_failure_returns_raw_error() {
        let calls = AtomicU32::new(0);
        let options = fast_options().with_max_retries(2);
        let result: Result<(), _> = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("status: 404".to_string()) }
            },
            &options,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result.unwrap_err() {
            RetryError::NotRetryable(e) => assert_eq!(e, "status: 404"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_after_transient_is_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err("timeout".to_string())
                    } else {
                        Err("status: 400".to_string())
                    }
                }
            },
            &fast_options(),
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.is_exhausted());
        assert_eq!(err.attempts(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_custom_predicate() {
        let calls = AtomicU32::new(0);
        let options = fast_options().with_should_retry(|_e: &String| false);
        let result: Result<(), _> = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("status: 503".to_string()) }
            },
            &options,
        )
        .await;

        assert!(matches!(result, Err(RetryError::NotRetryable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_observer_panic_does_not_abort_loop() {
        let calls = AtomicU32::new(0);
        let options = fast_options().with_on_retry(|_e: &String, _a, _d| panic!("broken logger"));
        let result = with_retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err("network error".to_string())
                    } else {
                        Ok("done")
                    }
                }
            },
            &options,
        )
        .await;

        assert_eq!(result.ok(), Some("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_abort_before_first_attempt() {
        let signal = CancellationToken::shared();
        signal.cancel("user left");
        let calls = AtomicU32::new(0);
        let options = fast_options().with_signal(signal);

        let result: Result<(), _> = with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("network error".to_string()) }
            },
            &options,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        match result.unwrap_err() {
            RetryError::Aborted(e) => {
                assert_eq!(e.reason, "user left");
                assert_eq!(e.attempts, 0);
                assert!(e.last_error.is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_during_sleep_wins_over_exhaustion() {
        let signal = CancellationToken::shared();
        let calls = Arc::new(AtomicU32::new(0));
        let options = RetryOptions::new()
            .with_max_retries(5)
            .with_initial_delay(Duration::from_secs(10))
            .with_jitter(false)
            .with_signal(signal.clone());

        let task = {
            let calls = calls.clone();
            tokio::spawn(async move {
                with_retry(
                    || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async { Err::<(), _>("ETIMEDOUT".to_string()) }
                    },
                    &options,
                )
                .await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        signal.cancel("stop");
        let result = task.await.expect("task should not panic");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result.unwrap_err() {
            RetryError::Aborted(e) => {
                assert_eq!(e.attempts, 1);
                assert_eq!(e.last_error.as_deref(), Some("ETIMEDOUT"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_make_retryable_reuses_options() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let retryable = make_retryable(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n % 2 == 0 {
                        Err("socket hang up".to_string())
                    } else {
                        Ok(n)
                    }
                }
            },
            fast_options(),
        );

        assert_eq!(retryable.call().await.ok(), Some(1));
        assert_eq!(retryable.call().await.ok(), Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(retryable.options().max_retries, 3);
    }
}
