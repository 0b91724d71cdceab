//! Retry logic with exponential backoff
//!
//! This module provides:
//! - Error classification (retryable vs permanent)
//! - Exponential backoff with jitter
//! - Max retry limits (3 retries default)
//! - Overall deadline and cancellation support
//! - Per-dependency circuit breakers

pub mod circuit_breaker;
pub mod classifier;
pub mod registry;
pub mod strategy;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStatus, CircuitState,
};
pub use classifier::{
    ErrorClass, PermanentError, RawCode, RetryClassifiable, RetryableError, UntypedError,
    classify_untyped, is_retryable,
};
pub use registry::CircuitBreakerRegistry;
pub use strategy::{RetryConfig, RetryEngine, RetryResult, backoff_delay};

/// Retry error types
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Overall deadline elapsed before the retry loop settled
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// External cancellation requested
    #[error("{operation} aborted by cancellation")]
    Aborted { operation: String },

    /// Retries stopped; carries the last error
    #[error("{0}")]
    Failed(E),
}

impl<E> RetryError<E> {
    /// The operation's own error, if the loop ran to completion.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Failed(err) => Some(err),
            RetryError::Timeout { .. } | RetryError::Aborted { .. } => None,
        }
    }
}

impl<E: RetryClassifiable> RetryClassifiable for RetryError<E> {
    fn classify(&self) -> ErrorClass {
        match self {
            RetryError::Timeout { .. } => ErrorClass::Retryable(RetryableError::NetworkTimeout),
            RetryError::Aborted { operation } => ErrorClass::Permanent(
                PermanentError::Unclassified(format!("{operation} aborted")),
            ),
            RetryError::Failed(err) => err.classify(),
        }
    }
}
