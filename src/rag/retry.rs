/// Bounded exponential backoff for retryable backend failures
///
/// Only errors the taxonomy marks retryable (connectivity, transient
/// internal) are retried; validation, isolation and timeout errors surface
/// immediately. Jitter avoids thundering-herd retries.

use crate::error::{RagError, RagResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try
    pub max_retries: u32,
    /// Base delay, doubled per attempt
    pub base_delay: Duration,
    /// Cap on the computed delay
    pub max_delay: Duration,
    /// Jitter factor in [0, 1] added on top of the computed delay
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100), // 100ms, 200ms, 400ms
            max_delay: Duration::from_millis(1000),
            jitter_factor: 0.1,
        }
    }
}

pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation`, retrying retryable failures with backoff
    pub async fn execute<F, Fut, T>(&self, operation: F) -> RagResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = RagResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !error.is_retryable() {
                        debug!("Not retrying error: {}", error);
                        return Err(error);
                    }

                    if attempt < self.config.max_retries {
                        let delay = self.delay_for(attempt);
                        warn!(
                            "Operation failed (attempt {}/{}), retrying in {:?}: {}",
                            attempt + 1,
                            self.config.max_retries + 1,
                            delay,
                            error
                        );
                        sleep(delay).await;
                    } else {
                        warn!(
                            "Operation failed after {} attempts: {}",
                            self.config.max_retries + 1,
                            error
                        );
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| RagError::Internal("Retry loop made no attempts".to_string())))
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exponential =
            Duration::from_millis(self.config.base_delay.as_millis() as u64 * (1u64 << attempt));
        let capped = std::cmp::min(exponential, self.config.max_delay);

        if self.config.jitter_factor > 0.0 {
            let jitter_range = (capped.as_millis() as f64 * self.config.jitter_factor) as u64;
            let jitter = rand::thread_rng().gen_range(0..=jitter_range);
            capped + Duration::from_millis(jitter)
        } else {
            capped
        }
    }
}
