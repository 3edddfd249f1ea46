//! Retry logic with linear backoff and a per-attempt timeout.
//!
//! This module provides [`RetryPolicy`], a generic wrapper that runs an
//! async operation up to `max_attempts` times. Every attempt races the
//! operation against a timer; if the timer wins the attempt counts as a
//! failure and the operation future is dropped, which cancels it.
//!
//! # Delay Calculation
//!
//! ```text
//! delay before attempt n+1 = base_delay * n
//! ```
//!
//! With defaults (base 2s, 3 attempts) the waits are 2s then 4s.
//!
//! The policy never looks at what the operation does. Callers that know some
//! errors are not worth retrying pass a predicate to [`RetryPolicy::run_with`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use mediagate_core::download::{RetryError, RetryPolicy};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_secs(1));
//!
//! let result: Result<u32, RetryError<String>> = policy
//!     .run(|attempt| async move {
//!         if attempt < 2 { Err(format!("attempt {attempt} failed")) } else { Ok(attempt) }
//!     })
//!     .await;
//!
//! assert_eq!(result.unwrap(), 2);
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Default maximum attempts (including the first).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default backoff base (2 seconds).
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Default per-attempt timeout (5 minutes).
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Error from the last attempt once retries are exhausted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The last attempt ran past the per-attempt timeout.
    #[error("attempt {attempts} timed out after {timeout:?}")]
    TimedOut {
        /// Attempts made in total.
        attempts: u32,
        /// The per-attempt timeout that expired.
        timeout: Duration,
    },

    /// The last attempt returned an error.
    #[error("attempt {attempts} failed: {error}")]
    Failed {
        /// Attempts made in total.
        attempts: u32,
        /// The operation's own error.
        error: E,
    },
}

impl<E> RetryError<E> {
    /// Returns how many attempts were made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::TimedOut { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Retry configuration.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `base_delay`: 2 seconds
/// - `attempt_timeout`: 5 minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Backoff unit; the wait after attempt `n` is `base_delay * n`.
    base_delay: Duration,

    /// Deadline for each individual attempt.
    attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            attempt_timeout,
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the backoff base.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Returns the per-attempt timeout.
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Backoff to wait after `attempt` (1-indexed) failed.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Runs `operation`, retrying every failure and timeout.
    ///
    /// `operation` receives the 1-indexed attempt number.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's outcome as a [`RetryError`] once attempts
    /// are exhausted.
    pub async fn run<T, E, F, Fut>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run_with(operation, |_| true).await
    }

    /// Runs `operation`, retrying only errors for which `should_retry` holds.
    ///
    /// Timeouts are always retried while attempts remain.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error immediately, otherwise the last
    /// attempt's outcome once attempts are exhausted.
    #[instrument(skip_all, fields(max_attempts = self.max_attempts, timeout_ms = self.attempt_timeout.as_millis()))]
    pub async fn run_with<T, E, F, Fut, P>(
        &self,
        mut operation: F,
        should_retry: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(attempt, "starting attempt");

            // Dropping the timed-out future cancels the operation.
            let error = match tokio::time::timeout(self.attempt_timeout, operation(attempt)).await
            {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) => {
                    if !should_retry(&error) {
                        debug!(attempt, %error, "error is not retryable");
                        return Err(RetryError::Failed {
                            attempts: attempt,
                            error,
                        });
                    }
                    RetryError::Failed {
                        attempts: attempt,
                        error,
                    }
                }
                Err(_elapsed) => RetryError::TimedOut {
                    attempts: attempt,
                    timeout: self.attempt_timeout,
                },
            };

            if attempt >= self.max_attempts {
                debug!(attempt, "max attempts reached");
                return Err(error);
            }

            let delay = self.delay_after(attempt);
            warn!(
                attempt,
                next_attempt = attempt + 1,
                delay_ms = delay.as_millis(),
                error = %error,
                "attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
