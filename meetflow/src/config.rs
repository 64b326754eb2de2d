//! Configuration for retries, circuit breaking, polling and credentials.
//!
//! Settings are plain serde types with per-field defaults, so a partial JSON
//! document is valid. `MEETFLOW_*` environment variables override file
//! values. Each section converts into the runtime options of its component.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::circuit::CircuitBreakerOptions;
use crate::errors::ConfigError;
use crate::observability::LogFormat;
use crate::poller::PollerOptions;
use crate::retry::{is_retryable_error, Backoff, RetryOptions};

/// Retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor between attempts.
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
    /// Whether to randomize delays.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetrySettings {
    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the first delay.
    #[must_use]
    pub fn with_initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    /// Sets the delay ceiling.
    #[must_use]
    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// The backoff schedule described by these settings.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff::default()
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_multiplier(self.backoff_multiplier)
            .with_jitter(self.jitter)
    }

    /// Retry options using the default retryability classifier.
    #[must_use]
    pub fn to_options<E: fmt::Display>(&self) -> RetryOptions<E> {
        RetryOptions::new()
            .with_max_retries(self.max_retries)
            .with_backoff(self.backoff())
            .with_should_retry(|e: &E| is_retryable_error(e))
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSettings {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Wait after the last failure before a trial call, in milliseconds.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

impl CircuitSettings {
    /// Breaker options described by these settings.
    #[must_use]
    pub fn to_options(&self) -> CircuitBreakerOptions {
        CircuitBreakerOptions::new()
            .with_failure_threshold(self.failure_threshold)
            .with_reset_timeout(Duration::from_millis(self.reset_timeout_ms))
    }
}

/// Summary poller settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerSettings {
    /// Wait between polls in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Overall generation timeout in milliseconds.
    #[serde(default = "default_poll_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_poll_timeout_ms() -> u64 {
    10 * 60 * 1000
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl PollerSettings {
    /// Poller options; each worker call is retried per `retry`.
    #[must_use]
    pub fn to_options(&self, retry: &RetrySettings) -> PollerOptions {
        PollerOptions::default()
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_max_retries(retry.max_retries)
            .with_backoff(retry.backoff())
    }
}

/// Credential cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCacheSettings {
    /// Refresh tokens expiring within this many seconds.
    #[serde(default = "default_refresh_buffer_secs")]
    pub refresh_buffer_secs: u64,
}

const MAX_REFRESH_BUFFER_SECS: u64 = 24 * 60 * 60;

fn default_refresh_buffer_secs() -> u64 {
    30
}

impl Default for TokenCacheSettings {
    fn default() -> Self {
        Self {
            refresh_buffer_secs: default_refresh_buffer_secs(),
        }
    }
}

impl TokenCacheSettings {
    /// The refresh buffer.
    #[must_use]
    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.refresh_buffer_secs)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeetflowConfig {
    /// Retry settings, also used for worker calls.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Circuit breaker settings.
    #[serde(default)]
    pub circuit: CircuitSettings,
    /// Summary poller settings.
    #[serde(default)]
    pub poller: PollerSettings,
    /// Credential cache settings.
    #[serde(default)]
    pub token_cache: TokenCacheSettings,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl MeetflowConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_json_str(&contents)
    }

    /// Applies overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(std::env::vars())
    }

    /// Applies `MEETFLOW_*` overrides from `vars`, then validates.
    ///
    /// Unknown keys are ignored.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            match key {
                "MEETFLOW_MAX_RETRIES" => self.retry.max_retries = parse_env(key, value)?,
                "MEETFLOW_INITIAL_DELAY_MS" => self.retry.initial_delay_ms = parse_env(key, value)?,
                "MEETFLOW_MAX_DELAY_MS" => self.retry.max_delay_ms = parse_env(key, value)?,
                "MEETFLOW_BACKOFF_MULTIPLIER" => {
                    self.retry.backoff_multiplier = parse_env(key, value)?;
                }
                "MEETFLOW_JITTER" => self.retry.jitter = parse_bool(key, value)?,
                "MEETFLOW_FAILURE_THRESHOLD" => {
                    self.circuit.failure_threshold = parse_env(key, value)?;
                }
                "MEETFLOW_RESET_TIMEOUT_MS" => self.circuit.reset_timeout_ms = parse_env(key, value)?,
                "MEETFLOW_POLL_INTERVAL_MS" => self.poller.poll_interval_ms = parse_env(key, value)?,
                "MEETFLOW_POLL_TIMEOUT_MS" => self.poller.timeout_ms = parse_env(key, value)?,
                "MEETFLOW_TOKEN_REFRESH_BUFFER_SECS" => {
                    self.token_cache.refresh_buffer_secs = parse_env(key, value)?;
                }
                "MEETFLOW_LOG_FORMAT" => {
                    self.logging.format = value.parse().map_err(|_| invalid_env(key, value))?;
                }
                _ => continue,
            }
            debug!(key, value, "Applied configuration override");
        }
        self.validate()
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier <= 0.0 {
            return Err(invalid("retry.backoff_multiplier", "must be a positive number"));
        }
        if self.circuit.failure_threshold == 0 {
            return Err(invalid("circuit.failure_threshold", "must be at least 1"));
        }
        if self.poller.poll_interval_ms == 0 {
            return Err(invalid("poller.poll_interval_ms", "must be greater than zero"));
        }
        if self.token_cache.refresh_buffer_secs > MAX_REFRESH_BUFFER_SECS {
            return Err(invalid(
                "token_cache.refresh_buffer_secs",
                "must be at most one day",
            ));
        }
        if self.poller.timeout_ms < self.poller.poll_interval_ms {
            return Err(invalid(
                "poller.timeout_ms",
                "must not be shorter than the poll interval",
            ));
        }
        Ok(())
    }

    /// Poller options from the poller and retry sections.
    #[must_use]
    pub fn poller_options(&self) -> PollerOptions {
        self.poller.to_options(&self.retry)
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn invalid_env(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid_env(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid_env(key, value)),
    }
}
