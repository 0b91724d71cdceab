//! Backoff strategy implementations
//!
//! Exponential backoff with optional jitter, a result-returning primitive
//! ([`RetryEngine::retry_with_backoff`]) and the error-raising, cancellable
//! and time-bounded façades built on it.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use solebox_feedback::LogContext;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::RetryError;
use super::classifier::RetryClassifiable;
use crate::logging::StructuredLogger;

/// Upper bound of the random jitter, as a fraction of the base delay.
const JITTER_FRACTION: f64 = 0.1;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add up to 10% random delay on top of each backoff
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

/// Outcome of one `retry_with_backoff` call.
#[derive(Debug)]
pub struct RetryResult<T, E> {
    pub outcome: Result<T, E>,
    /// Attempts actually made (1-indexed)
    pub attempts: u32,
    pub total_duration_ms: u64,
}

impl<T, E> RetryResult<T, E> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.outcome
    }
}

/// Base delay before the retry that follows `attempt` (1-indexed), without jitter.
///
/// `min(initial × multiplier^(attempt−1), max)`
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    Duration::from_secs_f64(base_delay_ms(config, attempt) / 1000.0)
}

fn base_delay_ms(config: &RetryConfig, attempt: u32) -> f64 {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let raw = config.initial_delay_ms as f64 * config.backoff_multiplier.powi(exponent);
    raw.min(config.max_delay_ms as f64).max(0.0)
}

/// Delay actually slept: the base delay plus jitter, never above `max_delay_ms`.
fn next_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = base_delay_ms(config, attempt);
    let jittered = if config.jitter {
        base + base * rand::rng().random_range(0.0..=JITTER_FRACTION)
    } else {
        base
    };
    Duration::from_secs_f64(jittered.min(config.max_delay_ms as f64) / 1000.0)
}

/// Executes operations under a retry policy and logs every decision.
#[derive(Clone)]
pub struct RetryEngine {
    logger: StructuredLogger,
    defaults: RetryConfig,
}

impl RetryEngine {
    pub fn new(logger: StructuredLogger, defaults: RetryConfig) -> Self {
        Self { logger, defaults }
    }

    pub fn defaults(&self) -> &RetryConfig {
        &self.defaults
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// A non-retryable error stops immediately after the attempt that produced
    /// it; a retryable one is retried up to `max_retries` times.
    pub async fn retry_with_backoff<T, E, F, Fut>(
        &self,
        mut operation: F,
        operation_name: &str,
        config: Option<&RetryConfig>,
    ) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryClassifiable + Display,
    {
        let config = config.unwrap_or(&self.defaults);
        let start = Instant::now();
        let max_attempts = config.max_retries.saturating_add(1);
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        self.logger.info(
                            format!("{operation_name} succeeded after {} retries", attempt - 1),
                            Some(attempt_context(operation_name, attempt, max_attempts)),
                        );
                    }
                    return RetryResult {
                        outcome: Ok(value),
                        attempts: attempt,
                        total_duration_ms: elapsed_ms(start),
                    };
                }
                Err(err) => {
                    let context = attempt_context(operation_name, attempt, max_attempts)
                        .with("error", err.to_string());

                    if !err.is_retryable() {
                        self.logger.error(
                            format!("{operation_name} failed with non-retryable error"),
                            Some(context.with("total_duration_ms", elapsed_ms(start))),
                        );
                        return RetryResult {
                            outcome: Err(err),
                            attempts: attempt,
                            total_duration_ms: elapsed_ms(start),
                        };
                    }

                    if attempt > config.max_retries {
                        self.logger.error(
                            format!("{operation_name} failed after {attempt} attempts"),
                            Some(context.with("total_duration_ms", elapsed_ms(start))),
                        );
                        return RetryResult {
                            outcome: Err(err),
                            attempts: attempt,
                            total_duration_ms: elapsed_ms(start),
                        };
                    }

                    let delay = next_delay(config, attempt);
                    self.logger.warn(
                        format!(
                            "{operation_name} attempt {attempt} failed, retrying in {}ms",
                            delay.as_millis()
                        ),
                        Some(context.with("delay_ms", delay.as_millis() as u64)),
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Like [`retry_with_backoff`](Self::retry_with_backoff), returning the final error.
    pub async fn retry<T, E, F, Fut>(
        &self,
        operation: F,
        operation_name: &str,
        config: Option<&RetryConfig>,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryClassifiable + Display,
    {
        self.retry_with_backoff(operation, operation_name, config)
            .await
            .into_result()
    }

    /// Retry until success, exhaustion, or cancellation of `cancel`.
    ///
    /// Each attempt receives a child of `cancel` so work it spawns can stop
    /// as well. Cancellation drops the in-flight attempt or backoff sleep at
    /// its current await point; an already-cancelled token makes no attempt.
    pub async fn retry_cancellable<T, E, F, Fut>(
        &self,
        mut operation: F,
        operation_name: &str,
        config: Option<&RetryConfig>,
        cancel: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryClassifiable + Display,
    {
        let attempts = self.retry(|| operation(cancel.child_token()), operation_name, config);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.logger.warn(
                    format!("{operation_name} aborted by cancellation"),
                    Some(LogContext::new().with("operation", operation_name)),
                );
                Err(RetryError::Aborted {
                    operation: operation_name.to_string(),
                })
            }
            result = attempts => result.map_err(RetryError::Failed),
        }
    }

    /// Retry with an overall deadline.
    ///
    /// When `timeout` elapses first the retry loop is dropped and the token
    /// handed to the operation is cancelled. The dropped attempt's side
    /// effects may still have landed: treat a timeout as "result unknown".
    pub async fn retry_with_timeout<T, E, F, Fut>(
        &self,
        operation: F,
        timeout: Duration,
        operation_name: &str,
        config: Option<&RetryConfig>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryClassifiable + Display,
    {
        let cancel = CancellationToken::new();
        let run = self.retry_cancellable(operation, operation_name, config, &cancel);

        match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                let timeout_ms = timeout.as_millis() as u64;
                self.logger.error(
                    format!("{operation_name} timed out after {timeout_ms}ms"),
                    Some(
                        LogContext::new()
                            .with("operation", operation_name)
                            .with("timeout_ms", timeout_ms),
                    ),
                );
                Err(RetryError::Timeout {
                    operation: operation_name.to_string(),
                    timeout_ms,
                })
            }
        }
    }
}

fn attempt_context(operation_name: &str, attempt: u32, max_attempts: u32) -> LogContext {
    LogContext::new()
        .with("operation", operation_name)
        .with("attempt", attempt)
        .with("max_attempts", max_attempts)
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
