//! Circuit breaker around a single operation.

use crate::errors::CircuitError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Calls pass through.
    #[default]
    Closed,
    /// Calls are rejected until the reset timeout elapses.
    Open,
    /// Trial calls are allowed.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Observer notified on every state transition.
pub type StateObserver = Arc<dyn Fn(CircuitState) + Send + Sync>;

/// Options for [`CircuitBreaker`].
#[derive(Clone)]
pub struct CircuitBreakerOptions {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time since the last failure before a trial call is allowed.
    pub reset_timeout: Duration,
    on_state_change: Option<StateObserver>,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_millis(30_000),
            on_state_change: None,
        }
    }
}

impl CircuitBreakerOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the reset timeout.
    #[must_use]
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Sets the state-change observer.
    #[must_use]
    pub fn with_on_state_change<F>(mut self, observer: F) -> Self
    where
        F: Fn(CircuitState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(observer));
        self
    }
}

impl fmt::Debug for CircuitBreakerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerOptions")
            .field("failure_threshold", &self.failure_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .field("has_observer", &self.on_state_change.is_some())
            .finish()
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures counted so far.
    pub failure_count: u32,
    /// Time since the last failure, if any.
    pub since_last_failure: Option<Duration>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// Guards an operation, rejecting calls after repeated failures.
///
/// The breaker owns its state; nothing outside it can mutate the counters
/// except [`CircuitBreaker::reset`].
pub struct CircuitBreaker<F> {
    operation: F,
    options: CircuitBreakerOptions,
    inner: Mutex<BreakerState>,
}

impl<F> CircuitBreaker<F> {
    /// Wraps `operation` with the given options.
    pub fn new(operation: F, options: CircuitBreakerOptions) -> Self {
        Self {
            operation,
            options,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Consecutive failures counted so far.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Returns a snapshot of the breaker.
    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            since_last_failure: inner.last_failure.map(|at| at.elapsed()),
        }
    }

    /// Clears the failure count and forces the circuit closed.
    pub fn reset(&self) {
        let changed = {
            let mut inner = self.inner.lock();
            inner.failure_count = 0;
            inner.last_failure = None;
            inner.trial_in_flight = false;
            let changed = inner.state != CircuitState::Closed;
            inner.state = CircuitState::Closed;
            changed
        };
        info!("Circuit breaker reset");
        if changed {
            self.notify(CircuitState::Closed);
        }
    }

    /// Runs the operation if the circuit allows it.
    ///
    /// While open and within the reset timeout the call is rejected with
    /// [`CircuitError::Open`] without invoking the operation. Once the timeout
    /// has elapsed the circuit moves to half-open and a single trial call runs.
    pub async fn execute<T, E, Fut>(&self) -> Result<T, CircuitError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let is_trial = self.admit()?;
        // Clears the trial flag if the caller drops this future mid-call.
        let _trial = is_trial.then(|| TrialGuard(&self.inner));

        match (self.operation)().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    fn admit<E>(&self) -> Result<bool, CircuitError<E>> {
        let (transitioned, is_trial) = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => (false, false),
                CircuitState::Open => {
                    let elapsed = inner.last_failure.map_or(Duration::MAX, |at| at.elapsed());
                    if elapsed < self.options.reset_timeout {
                        debug!(
                            remaining_ms = (self.options.reset_timeout - elapsed).as_millis() as u64,
                            "Circuit breaker rejected call"
                        );
                        return Err(CircuitError::Open);
                    }
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    (true, true)
                }
                CircuitState::HalfOpen => {
                    if inner.trial_in_flight {
                        return Err(CircuitError::Open);
                    }
                    inner.trial_in_flight = true;
                    (false, true)
                }
            }
        };
        if transitioned {
            info!("Circuit breaker half-open, allowing trial call");
            self.notify(CircuitState::HalfOpen);
        }
        Ok(is_trial)
    }

    fn on_success(&self) {
        let closed = {
            let mut inner = self.inner.lock();
            inner.failure_count = 0;
            inner.trial_in_flight = false;
            let closed = inner.state != CircuitState::Closed;
            inner.state = CircuitState::Closed;
            closed
        };
        if closed {
            info!("Circuit breaker closed");
            self.notify(CircuitState::Closed);
        }
    }

    fn on_failure(&self) {
        let opened = {
            let mut inner = self.inner.lock();
            inner.failure_count = inner.failure_count.saturating_add(1);
            inner.last_failure = Some(Instant::now());
            inner.trial_in_flight = false;
            // A half-open failure below the threshold stays half-open, so the
            // next call is admitted without waiting for the reset timeout.
            if inner.failure_count >= self.options.failure_threshold
                && inner.state != CircuitState::Open
            {
                inner.state = CircuitState::Open;
                Some(inner.failure_count)
            } else {
                None
            }
        };
        if let Some(failures) = opened {
            warn!(failures, "Circuit breaker opened");
            self.notify(CircuitState::Open);
        }
    }

    fn notify(&self, state: CircuitState) {
        let Some(observer) = self.options.on_state_change.as_ref() else {
            return;
        };
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| observer(state))) {
            warn!(%state, "Circuit breaker observer panicked: {:?}", e);
        }
    }
}

struct TrialGuard<'a>(&'a Mutex<BreakerState>);

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().trial_in_flight = false;
    }
}

impl<F> fmt::Debug for CircuitBreaker<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("options", &self.options)
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}
