//! Per-dependency circuit breaker
//!
//! ## States
//!
//! - **Closed**: normal operation, requests pass through
//! - **Open**: fail fast until `next_retry_time`
//! - **HalfOpen**: requests pass through to probe recovery; one failure reopens,
//!   `success_threshold` consecutive successes close
//!
//! [`CircuitBreaker::state`] and [`CircuitBreaker::status`] are pure reads.
//! [`CircuitBreaker::try_acquire`] is the admission check and is the only read
//! that mutates: once an open breaker's wait has elapsed it moves to half-open.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use solebox_feedback::LogContext;

use super::classifier::{ErrorClass, PermanentError, RetryClassifiable};
use crate::clock::{Clock, SystemClock};
use crate::logging::StructuredLogger;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// How long the circuit stays open before admitting a probe
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_success_threshold() -> u32 {
    2
}
fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Point-in-time snapshot of a breaker. Times are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStatus {
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub last_failure_time: Option<u64>,
    pub next_retry_time: Option<u64>,
}

/// Circuit breaker error type
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Rejected without running the operation
    #[error("Circuit breaker '{name}' is open; retry in {retry_in_ms}ms")]
    Open { name: String, retry_in_ms: u64 },

    /// Underlying operation failed
    #[error("{0}")]
    Failure(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }

    pub fn into_failure(self) -> Option<E> {
        match self {
            CircuitBreakerError::Failure(err) => Some(err),
            CircuitBreakerError::Open { .. } => None,
        }
    }
}

impl<E: RetryClassifiable> RetryClassifiable for CircuitBreakerError<E> {
    fn classify(&self) -> ErrorClass {
        match self {
            // Backing off inside an open window only hits the breaker again.
            CircuitBreakerError::Open { name, .. } => ErrorClass::Permanent(
                PermanentError::Unclassified(format!("circuit breaker '{name}' is open")),
            ),
            CircuitBreakerError::Failure(err) => err.classify(),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure_time: Option<u64>,
    next_retry_time: Option<u64>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            last_failure_time: None,
            next_retry_time: None,
        }
    }
}

/// Three-state breaker guarding one named dependency.
///
/// Every transition happens under one lock with no await point inside, so
/// concurrent callers always observe a consistent state/counter pair.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    logger: StructuredLogger,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(
            name,
            config,
            Arc::new(SystemClock),
            StructuredLogger::disabled(),
        )
    }

    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            logger,
            state: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, without side effects.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Snapshot of state and counters, without side effects.
    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.lock();
        CircuitBreakerStatus {
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
            last_failure_time: inner.last_failure_time,
            next_retry_time: inner.next_retry_time,
        }
    }

    /// Whether a request may run now.
    ///
    /// Mutates: an open breaker whose `next_retry_time` has passed moves to
    /// half-open (with a fresh success count) and admits the request.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        let current = inner.state;
        match current {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let now = self.clock.now_ms();
                let ready = inner.next_retry_time.is_none_or(|at| now >= at);
                if ready {
                    inner.state = CircuitState::HalfOpen;
                    inner.successes = 0;
                    drop(inner);
                    self.logger.info(
                        format!("Circuit breaker {} entering HALF_OPEN", self.name),
                        Some(self.context()),
                    );
                }
                ready
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.failures = 0;
        inner.last_failure_time = None;

        if inner.state == CircuitState::HalfOpen {
            inner.successes = inner.successes.saturating_add(1);
            if inner.successes >= self.config.success_threshold {
                *inner = BreakerState::closed();
                drop(inner);
                self.logger.info(
                    format!("Circuit breaker {} CLOSED after recovery", self.name),
                    Some(self.context()),
                );
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure_time = Some(self.clock.now_ms());

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if should_open && let Some(failures) = open_locked(&mut inner, self.opens_until()) {
            drop(inner);
            self.log_opened(failures);
        }
    }

    /// Force the breaker open. No-op when already open.
    pub fn open(&self) {
        let mut inner = self.lock();
        if let Some(failures) = open_locked(&mut inner, self.opens_until()) {
            drop(inner);
            self.log_opened(failures);
        }
    }

    /// Force the breaker closed, clearing all counters.
    pub fn reset(&self) {
        *self.lock() = BreakerState::closed();
    }

    /// Run `operation` under the breaker.
    ///
    /// Rejects without calling `operation` when [`try_acquire`](Self::try_acquire)
    /// refuses; otherwise records the outcome.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            let retry_in_ms = self.retry_in_ms();
            self.logger.warn(
                format!("Circuit breaker {} rejected request", self.name),
                Some(self.context().with("retry_in_ms", retry_in_ms)),
            );
            return Err(CircuitBreakerError::Open {
                name: self.name.clone(),
                retry_in_ms,
            });
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(CircuitBreakerError::Failure(err))
            }
        }
    }

    fn retry_in_ms(&self) -> u64 {
        let next = self.lock().next_retry_time;
        next.map_or(0, |at| at.saturating_sub(self.clock.now_ms()))
    }

    fn opens_until(&self) -> u64 {
        self.clock.now_ms().saturating_add(self.config.timeout_ms)
    }

    fn log_opened(&self, failures: u32) {
        self.logger.warn(
            format!("Circuit breaker {} OPEN", self.name),
            Some(
                self.context()
                    .with("failures", failures)
                    .with("timeout_ms", self.config.timeout_ms),
            ),
        );
    }

    fn context(&self) -> LogContext {
        LogContext::new().with("circuit_breaker", self.name.as_str())
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("status", &self.status())
            .finish()
    }
}

/// Move to OPEN, returning the failure count when the state actually changed.
fn open_locked(inner: &mut BreakerState, next_retry_time: u64) -> Option<u32> {
    if inner.state == CircuitState::Open {
        return None;
    }
    inner.state = CircuitState::Open;
    inner.next_retry_time = Some(next_retry_time);
    Some(inner.failures)
}
