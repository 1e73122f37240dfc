//! Retry policies for store operations

use super::backoff::{BackoffConfig, BackoffStrategy, ExponentialBackoff};
use super::{ErrorClass, Retryable};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Retry budget and backoff timing for store operations
///
/// # Example
/// ```
/// use river_core::recovery::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig::default()
///     .with_max_attempts(5)
///     .with_initial_delay(Duration::from_millis(20));
/// assert_eq!(config.max_attempts, 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Maximum total time to spend retrying
    #[serde(with = "humantime_serde")]
    pub max_duration: Duration,
    /// Whether to retry errors classified as unknown
    pub retry_unknown: bool,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            max_duration: Duration::from_secs(10),
            retry_unknown: false,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            max_duration: Duration::ZERO,
            retry_unknown: false,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = duration;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retry_unknown(mut self, retry: bool) -> Self {
        self.retry_unknown = retry;
        self
    }

    pub fn to_backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.backoff_multiplier,
            jitter: self.jitter,
            jitter_ratio: 0.2,
        }
    }

    pub fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::with_config(self.to_backoff_config())
    }
}

/// Result of a retried operation
#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success(T),
    /// Gave up: the error was permanent or the budget ran out
    Failed {
        error: E,
        attempts: u32,
        elapsed: Duration,
    },
    Cancelled,
}

impl<T, E> RetryResult<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Retry policy for store operations
pub struct RetryPolicy {
    config: RetryConfig,
    backoff: Box<dyn BackoffStrategy>,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::with_config(RetryConfig::default())
    }

    pub fn with_config(config: RetryConfig) -> Self {
        let backoff = config.create_backoff();
        Self {
            config,
            backoff: Box::new(backoff),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// `attempt` is 0-indexed, so `max_attempts = 3` allows attempts 0, 1 and 2
    pub fn should_retry<E: Retryable>(&self, error: &E, attempt: u32) -> bool {
        if attempt + 1 >= self.config.max_attempts {
            return false;
        }

        match error.retry_class() {
            ErrorClass::Transient => true,
            ErrorClass::Permanent => false,
            ErrorClass::Unknown => self.config.retry_unknown,
        }
    }

    /// Execute an operation, retrying transient failures
    pub async fn execute<T, E, F, Fut>(
        &mut self,
        mut operation: F,
        cancel_token: Option<CancellationToken>,
    ) -> RetryResult<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            if let Some(ref token) = cancel_token {
                if token.is_cancelled() {
                    return RetryResult::Cancelled;
                }
            }

            match operation().await {
                Ok(result) => {
                    self.backoff.reset();
                    return RetryResult::Success(result);
                }
                Err(error) => {
                    let out_of_time = start.elapsed() >= self.config.max_duration;
                    if out_of_time || !self.should_retry(&error, attempt) {
                        self.backoff.reset();
                        return RetryResult::Failed {
                            error,
                            attempts: attempt + 1,
                            elapsed: start.elapsed(),
                        };
                    }

                    let delay = self.backoff.delay_for_attempt(attempt);
                    debug!(attempt, ?delay, error = %error, "Retrying store operation");
                    attempt += 1;

                    if let Some(ref token) = cancel_token {
                        tokio::select! {
                            _ = token.cancelled() => {
                                return RetryResult::Cancelled;
                            }
                            _ = sleep(delay) => {}
                        }
                    } else {
                        sleep(delay).await;
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::with_config(
            RetryConfig::default()
                .with_max_attempts(max_attempts)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        )
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: RetryResult<i32, BackendError> = fast(5)
            .execute(
                || {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(BackendError::Unavailable("connection refused".into()))
                        } else {
                            Ok(42)
                        }
                    }
                },
                None,
            )
            .await;

        assert!(matches!(result, RetryResult::Success(42)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: RetryResult<(), BackendError> = fast(3)
            .execute(
                || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(BackendError::Unavailable("down".into()))
                    }
                },
                None,
            )
            .await;

        match result {
            RetryResult::Failed { attempts: n, .. } => assert_eq!(n, 3),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: RetryResult<(), BackendError> = fast(5)
            .execute(
                || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(BackendError::NotFound("s1".into()))
                    }
                },
                None,
            )
            .await;

        assert!(!result.is_success());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_cancellation() {
        let token = CancellationToken::new();
        token.cancel();

        let result: RetryResult<(), BackendError> = fast(5)
            .execute(
                || async { Err(BackendError::Unavailable("down".into())) },
                Some(token),
            )
            .await;

        assert!(matches!(result, RetryResult::Cancelled));
    }
}
