//! Backoff policy for transport-level retries.
//!
//! Only failures below the JSON-RPC method layer are retried here: dropped
//! connections, timeouts, 5xx and quota responses. What a remote method
//! reports about its own business outcome is never retried.

use std::time::Duration;

use crate::config::RetryConfig;

// MARK: - Constants

/// Default maximum number of attempts for transient failures, first included.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default initial backoff duration (500 ms).
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;

/// Default maximum backoff duration (30 seconds).
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

/// Default backoff multiplier.
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default maximum number of attempts while the service reports rate limiting.
const DEFAULT_RATE_LIMIT_ATTEMPTS: u32 = 5;

/// Wait used when a rate-limited response carries no `Retry-After`.
const DEFAULT_RATE_LIMIT_BACKOFF_MS: u64 = 1000;

// MARK: - Retry Policy

/// Policy for retrying failed wire requests with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts for transient failures.
    pub max_attempts: u32,
    /// Initial backoff duration in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds.
    pub max_backoff_ms: u64,
    /// Backoff multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Maximum number of attempts while rate limited.
    pub rate_limit_attempts: u32,
    /// Rate-limit wait when the service gives no hint, in milliseconds.
    pub rate_limit_backoff_ms: u64,
}

impl RetryPolicy {
    /// Create a new retry policy with default settings.
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            rate_limit_attempts: DEFAULT_RATE_LIMIT_ATTEMPTS,
            rate_limit_backoff_ms: DEFAULT_RATE_LIMIT_BACKOFF_MS,
        }
    }

    /// Build from the `[retry]` config section.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            backoff_multiplier: config.backoff_multiplier,
            rate_limit_attempts: config.rate_limit_attempts.max(1),
            rate_limit_backoff_ms: config.rate_limit_backoff_ms,
        }
    }

    /// Set maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set initial backoff duration.
    pub fn with_initial_backoff(mut self, duration: Duration) -> Self {
        self.initial_backoff_ms = duration.as_millis() as u64;
        self
    }

    /// Set maximum backoff duration.
    pub fn with_max_backoff(mut self, duration: Duration) -> Self {
        self.max_backoff_ms = duration.as_millis() as u64;
        self
    }

    /// Set backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_rate_limit_attempts(mut self, attempts: u32) -> Self {
        self.rate_limit_attempts = attempts.max(1);
        self
    }

    pub fn with_rate_limit_backoff(mut self, duration: Duration) -> Self {
        self.rate_limit_backoff_ms = duration.as_millis() as u64;
        self
    }

    /// Calculate backoff duration for a given retry (0 for the first retry).
    pub fn calculate_backoff(&self, retry: u32) -> Duration {
        let backoff_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(retry as i32))
        .min(self.max_backoff_ms as f64) as u64;

        Duration::from_millis(backoff_ms)
    }

    /// How long to wait after a rate-limited response.
    ///
    /// The server's hint wins, capped at `max_backoff_ms`.
    pub fn rate_limit_delay(&self, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) => hint.min(Duration::from_millis(self.max_backoff_ms)),
            None => Duration::from_millis(self.rate_limit_backoff_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}
