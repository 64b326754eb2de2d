//! Exponential backoff with optional jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound of the extra delay added by jitter, as a fraction of the base.
pub const JITTER_FACTOR: f64 = 0.5;

/// Parameters of the backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap applied before jitter.
    pub max_delay: Duration,
    /// Growth factor between consecutive retries.
    pub multiplier: f64,
    /// Whether to add 0-50% random extra delay.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl Backoff {
    /// Creates a backoff with the default schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    /// Same as [`Backoff::delay`] with a caller-supplied random source.
    #[must_use]
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay_ms(attempt);
        let millis = if self.jitter {
            base * (1.0 + rng.gen::<f64>() * JITTER_FACTOR)
        } else {
            base
        };
        Duration::from_millis(millis.round() as u64)
    }

    /// The non-jittered delay in milliseconds, already clamped to `max_delay`.
    #[must_use]
    pub fn base_delay_ms(&self, attempt: u32) -> f64 {
        let initial = self.initial_delay.as_millis() as f64;
        let max = self.max_delay.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let grown = initial * self.multiplier.powi(exponent);
        // powi overflows to infinity (or NaN for 0 * inf); both clamp to max.
        if grown.is_nan() {
            return if initial == 0.0 { 0.0 } else { max };
        }
        grown.min(max).max(0.0)
    }
}

/// Computes a retry delay from raw parameters.
///
/// `delay = min(initial * multiplier^attempt, max)`, then scaled by
/// `1 + random * 0.5` when jitter is enabled and rounded to whole
/// milliseconds.
#[must_use]
pub fn calculate_delay(
    attempt: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
) -> Duration {
    Backoff {
        initial_delay,
        max_delay,
        multiplier,
        jitter,
    }
    .delay(attempt)
}
