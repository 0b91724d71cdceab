//! SoleBox resilience core
//!
//! Retry with backoff, per-dependency circuit breakers, structured logging and
//! the API/database error taxonomy that the scraper and HTTP routes share.
//!
//! Everything hangs off an explicitly constructed [`ResilienceContext`]; there
//! is no process-wide state.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
#[cfg(feature = "dev-faults")]
pub mod faults;
pub mod logging;
pub mod metrics;
pub mod retry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigLoader, Environment, ResilienceConfig};
pub use context::{ResilienceContext, ResilienceContextBuilder};
pub use error::{ApiError, DbError, ErrorCode, Failure, handle_db_error, handle_error};
pub use logging::{StructuredLogger, generate_request_id, init_tracing};
pub use metrics::{DatabaseMetrics, QueryMetric, QueryStats};
pub use retry::{
    CircuitBreaker, CircuitBreakerError, CircuitState, RetryClassifiable, RetryConfig,
    RetryEngine, RetryError, RetryResult,
};

/// SoleBox resilience version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
