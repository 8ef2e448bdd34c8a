//! Bounded, fixed-delay retry for event log reads.
//!
//! Only reads go through here. Appends are never retried: a batch that failed
//! after reaching the server may still have committed.

use async_trait::async_trait;
use metrics::counter;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::StoreConfig;
use crate::error::{Result, StrandError};

/// How reads are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (1 = no retries).
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
    /// Deadline for each individual attempt.
    pub operation_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for RetryPolicy {
    fn from(config: &StoreConfig) -> Self {
        Self {
            max_attempts: config.read_retry_attempts.max(1),
            delay: config.read_retry_delay,
            operation_timeout: config.operation_timeout,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            operation_timeout: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }
}

/// Source of the pause between attempts. Tests substitute one that records
/// calls instead of waiting.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up.
///
/// `operation` names the read in logs and in the `strand_read_retries_total`
/// counter.
pub async fn retry_read<T, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    operation: &'static str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = match policy.operation_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, op()).await {
                Ok(result) => result,
                Err(elapsed) => Err(StrandError::from(elapsed).with_context("operation", operation)),
            },
            None => op().await,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error_code = %e.code(),
                    "Transient read failure, retrying"
                );
                counter!("strand_read_retries_total", "operation" => operation).increment(1);
                sleeper.sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!(
                        operation,
                        attempts = attempt,
                        error_code = %e.code(),
                        "Read failed after exhausting retries"
                    );
                }
                return Err(e);
            }
        }
    }
}
