//! Retry policy: attempt budget, exponential backoff with jitter, and the
//! retryable-error predicate.

use std::time::Duration;

use rand::Rng;

use crate::defaults;
use crate::models::{FailureKind, RequestError};

/// Pure classification from failure kind to "try again".
pub type RetryPredicate = fn(FailureKind) -> bool;

/// Configuration governing a task's retry loop.
///
/// Immutable for the lifetime of a batch and shared by every executor in it.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Cap on the exponential part of the delay.
    pub max_backoff: Duration,
    /// Upper bound of uniform random jitter added to every delay.
    pub jitter: Duration,
    /// Wall-clock limit for a single attempt.
    pub attempt_timeout: Duration,
    /// Wait at least as long as a server-provided `Retry-After`.
    pub honor_retry_after: bool,
    /// Ceiling on a honoured `Retry-After`.
    pub max_retry_after: Duration,
    retryable: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(defaults::INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(defaults::MAX_BACKOFF_MS),
            jitter: Duration::from_millis(defaults::JITTER_MS),
            attempt_timeout: Duration::from_secs(defaults::ATTEMPT_TIMEOUT_SECS),
            honor_retry_after: true,
            max_retry_after: Duration::from_secs(defaults::MAX_RETRY_AFTER_SECS),
            retryable: FailureKind::is_retryable,
        }
    }
}

impl RetryPolicy {
    /// Create policy from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `VOLLEY_MAX_ATTEMPTS` | `5` | Attempts per task, including the first |
    /// | `VOLLEY_INITIAL_BACKOFF_MS` | `1000` | Delay before the second attempt |
    /// | `VOLLEY_MAX_BACKOFF_MS` | `16000` | Cap on the exponential delay |
    /// | `VOLLEY_JITTER_MS` | `1000` | Max random jitter added to each delay |
    /// | `VOLLEY_ATTEMPT_TIMEOUT_SECS` | `60` | Per-attempt timeout |
    /// | `VOLLEY_HONOR_RETRY_AFTER` | `true` | Respect `Retry-After` headers |
    /// | `VOLLEY_MAX_RETRY_AFTER_SECS` | `120` | Longest `Retry-After` honoured |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_attempts = env_parse("VOLLEY_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts);
        let initial_backoff = env_parse("VOLLEY_INITIAL_BACKOFF_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.initial_backoff);
        let max_backoff = env_parse("VOLLEY_MAX_BACKOFF_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_backoff);
        let jitter = env_parse("VOLLEY_JITTER_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.jitter);
        let attempt_timeout = env_parse("VOLLEY_ATTEMPT_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.attempt_timeout);
        let honor_retry_after = std::env::var("VOLLEY_HONOR_RETRY_AFTER")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(defaults.honor_retry_after);
        let max_retry_after = env_parse("VOLLEY_MAX_RETRY_AFTER_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.max_retry_after);

        defaults
            .with_max_attempts(max_attempts)
            .with_backoff(initial_backoff, max_backoff)
            .with_jitter(jitter)
            .with_attempt_timeout(attempt_timeout)
            .with_honor_retry_after(honor_retry_after)
            .with_max_retry_after(max_retry_after)
    }

    /// Set the attempt budget. Values below 1 are raised to 1.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the initial and maximum backoff. `max` is raised to `initial` if
    /// smaller.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_honor_retry_after(mut self, honor: bool) -> Self {
        self.honor_retry_after = honor;
        self
    }

    pub fn with_max_retry_after(mut self, ceiling: Duration) -> Self {
        self.max_retry_after = ceiling;
        self
    }

    /// Replace the retryable-error predicate.
    pub fn with_retry_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.retryable = predicate;
        self
    }

    /// Whether an attempt that ended with `error` may be retried, budget
    /// permitting.
    pub fn is_retryable(&self, error: &RequestError) -> bool {
        (self.retryable)(error.kind)
    }

    /// Whether another attempt is allowed after attempt number `attempt`
    /// (1-based) failed with `error`.
    pub fn should_retry(&self, attempt: u32, error: &RequestError) -> bool {
        attempt < self.max_attempts && self.is_retryable(error)
    }

    /// Pre-jitter delay after attempt number `attempt` (1-based):
    /// `min(max_backoff, initial_backoff * 2^(attempt - 1))`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }

    /// Full delay to await after attempt `attempt` failed with `error`:
    /// base delay plus uniform jitter, stretched to the server's
    /// `Retry-After` (at most `max_retry_after`) when that is longer and
    /// honoured.
    pub fn backoff(&self, attempt: u32, error: &RequestError) -> Duration {
        let delay = self.base_delay(attempt) + self.sample_jitter();

        match error.retry_after {
            Some(retry_after) if self.honor_retry_after => {
                delay.max(retry_after.min(self.max_retry_after))
            }
            _ => delay,
        }
    }

    fn sample_jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
