//! Bounded retry with exponential backoff for external calls
//!
//! Every call to the embedding service, the vector index and the language
//! model goes through [`RetryPolicy::run`]. Each attempt gets its own
//! timeout; a timeout counts as a transient failure. Fatal errors are
//! returned immediately.

use crate::config::RetryConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use backoff::{future::retry_notify, ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Attempt cap, backoff curve and per-call timeout
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    call_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
            call_timeout,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            Duration::from_secs(config.call_timeout_secs),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_multiplier(2.0)
            .with_randomization_factor(0.2)
            // the attempt cap bounds the loop, not wall-clock time
            .with_max_elapsed_time(None)
            .build()
    }

    /// Run `call` until it succeeds, fails fatally or exhausts the attempt cap
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts;
        let call_timeout = self.call_timeout;
        let mut attempt = 0u32;

        retry_notify(
            self.backoff(),
            || {
                attempt += 1;
                let current = attempt;
                let fut = call();
                async move {
                    let outcome = match tokio::time::timeout(call_timeout, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(AppError::Timeout {
                            operation: operation.to_string(),
                            timeout_ms: call_timeout.as_millis() as u64,
                        }),
                    };

                    outcome.map_err(|err| {
                        if !err.is_transient() || current >= max_attempts {
                            return backoff::Error::permanent(err);
                        }
                        match err.retry_after() {
                            Some(delay) => backoff::Error::retry_after(err, delay),
                            None => backoff::Error::transient(err),
                        }
                    })
                }
            },
            |err: AppError, delay: Duration| {
                metrics::record_retry(operation);
                warn!(
                    operation = operation,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    max_attempts = max_attempts,
                    "Transient failure, retrying"
                );
            },
        )
        .await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(1),
            Duration::from_millis(5),
            Duration::from_millis(200),
        )
    }

    fn transient() -> AppError {
        AppError::EmbeddingService { message: "503".into(), retryable: true }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = fast_policy(3)
            .run("embed", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transient())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(assert_ok!(result), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_at_attempt_cap() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = fast_policy(3)
            .run("embed", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;

        assert_err!(&result);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = fast_policy(5)
            .run("embed", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::EmbeddingDimensionMismatch { expected: 4, actual: 2 }) }
            })
            .await;

        assert!(matches!(result, Err(AppError::EmbeddingDimensionMismatch { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_retried_then_surfaced() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let policy = RetryPolicy::new(
            2,
            Duration::from_millis(1),
            Duration::from_millis(1),
            Duration::from_millis(20),
        );

        let result: Result<()> = policy
            .run("generate", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(AppError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
