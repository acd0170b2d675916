//! Retry logic with exponential backoff
//!
//! Marketplace lookups and release enumeration go over the network and may
//! fail transiently. This module retries them with bounded attempts so the
//! resolution policy never has to.

use crate::core::error::SyncError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Options for retry behavior
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for SyncError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

impl Retryable for anyhow::Error {
    fn is_retryable(&self) -> bool {
        if let Some(error) = self.downcast_ref::<SyncError>() {
            return error.is_transient();
        }
        is_transient_message(&self.to_string())
    }
}

/// Check an error message against known transient network failure patterns
pub fn is_transient_message(message: &str) -> bool {
    let retryable_patterns = [
        "econnrefused",
        "enotfound",
        "etimedout",
        "econnreset",
        "socket hang up",
        "network error",
        "timeout",
        "timed out",
        "connection refused",
        "connection reset",
    ];

    let message = message.to_lowercase();
    retryable_patterns
        .iter()
        .any(|pattern| message.contains(pattern))
}

/// Retry manager for executing operations with exponential backoff
///
/// # Examples
///
/// ```no_run
/// use extension_sync::core::{RetryManager, RetryOptions};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let manager = RetryManager::new(RetryOptions::default());
///
///     let version = manager.retry(|| async {
///         Ok::<_, anyhow::Error>("1.2.0")
///     }).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RetryManager {
    options: RetryOptions,
}

impl RetryManager {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    /// Execute the given async operation, retrying retryable errors
    pub async fn retry<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut delay = self.options.initial_delay;
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if !error.is_retryable() || attempt >= self.options.max_attempts.max(1) {
                        return Err(error);
                    }

                    debug!(attempt, %error, "retrying after {:?}", delay);
                    sleep(delay).await;

                    delay = Duration::from_secs_f64(
                        delay.as_secs_f64() * self.options.backoff_multiplier,
                    )
                    .min(self.options.max_delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_options(max_attempts: u32) -> RetryOptions {
        RetryOptions {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        }
    }

    fn network_error() -> SyncError {
        SyncError::TransientNetwork {
            service: "marketplace".to_string(),
            message: "connection reset".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retry_success_on_first_attempt() {
        let manager = RetryManager::new(RetryOptions::default());

        let result = manager.retry(|| async { Ok::<_, SyncError>(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_success_after_transient_failures() {
        let manager = RetryManager::new(fast_options(3));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = manager
            .retry(move || {
                let count = counter_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(network_error())
                    } else {
                        Ok("1.0.0")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "1.0.0");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let manager = RetryManager::new(fast_options(3));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = manager
            .retry(move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async move { Err::<i32, _>(network_error()) }
            })
            .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let manager = RetryManager::new(fast_options(5));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = manager
            .retry(move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err::<i32, _>(SyncError::Unresolvable {
                        id: "a.b".to_string(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_anyhow_message_patterns() {
        assert!(anyhow::anyhow!("Connection Refused").is_retryable());
        assert!(anyhow::anyhow!("operation timed out").is_retryable());
        assert!(anyhow::Error::new(network_error()).is_retryable());
        assert!(!anyhow::anyhow!("Invalid input").is_retryable());
    }

    #[tokio::test]
    async fn test_exponential_backoff_waits() {
        let manager = RetryManager::new(RetryOptions {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
        });

        let start = std::time::Instant::now();
        let _ = manager
            .retry(|| async { Err::<i32, _>(network_error()) })
            .await;

        // 10ms + 20ms, no wait after the last attempt
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_retry_options_default() {
        let options = RetryOptions::default();

        assert_eq!(options.max_attempts, 5);
        assert_eq!(options.initial_delay, Duration::from_secs(1));
        assert_eq!(options.max_delay, Duration::from_secs(30));
    }
}
