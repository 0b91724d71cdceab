//! Fault injection for exercising retry and breaker paths
//!
//! Feature-gated behind `dev-faults` to prevent accidental production use.
//!
//! ## Supported Fault Types
//! - **Disconnect**: dropped upstream connection
//! - **RateLimit (429)**: upstream rate limiting
//! - **Timeout**: operation timeout
//! - **Db**: lost database connection
//!
//! ## Configuration via Environment Variables
//! ```bash
//! SOLEBOX_FAULTS=timeout:2,429:1,disconnect:1,db:1   # counts per fault type
//! SOLEBOX_FAULTS_TIMEOUT_MS=5000                     # reported timeout (default 30000)
//! ```
//!
//! A [`FaultPlan`] is an ordinary value: build one per test or per scraper
//! and every injected fault is consumed from that plan only.

// Note: #[cfg(feature = "dev-faults")] is specified at the module inclusion site (lib.rs)

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::DbError;
use crate::retry::{ErrorClass, RetryClassifiable, RetryableError, UntypedError};

pub const FAULTS_ENV: &str = "SOLEBOX_FAULTS";
pub const FAULTS_TIMEOUT_ENV: &str = "SOLEBOX_FAULTS_TIMEOUT_MS";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// A fault handed out by a [`FaultPlan`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InjectedFault {
    #[error("socket hang up (fault injected)")]
    Disconnect,

    #[error("rate limit exceeded: 429 Too Many Requests (fault injected)")]
    RateLimit,

    #[error("operation timed out after {duration_ms}ms (fault injected)")]
    Timeout { duration_ms: u64 },

    #[error("connection to database lost (fault injected)")]
    Db,
}

impl InjectedFault {
    /// The production-shaped error this fault stands in for.
    pub fn into_error(self) -> anyhow::Error {
        match self {
            InjectedFault::Db => DbError::connection_lost(self.to_string()).into(),
            InjectedFault::RateLimit => UntypedError::new(self.to_string()).with_status(429).into(),
            InjectedFault::Disconnect | InjectedFault::Timeout { .. } => {
                UntypedError::new(self.to_string()).into()
            }
        }
    }
}

impl RetryClassifiable for InjectedFault {
    fn classify(&self) -> ErrorClass {
        let kind = match self {
            InjectedFault::Disconnect => RetryableError::ConnectionFailure,
            InjectedFault::RateLimit => RetryableError::RateLimited,
            InjectedFault::Timeout { .. } => RetryableError::NetworkTimeout,
            InjectedFault::Db => RetryableError::DatabaseTransient,
        };
        ErrorClass::Retryable(kind)
    }
}

/// Remaining fault counts, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultCounts {
    pub disconnect: usize,
    pub rate_limit: usize,
    pub timeout: usize,
    pub db: usize,
}

/// Bounded supply of faults.
#[derive(Debug, Default)]
pub struct FaultPlan {
    disconnect: AtomicUsize,
    rate_limit: AtomicUsize,
    timeout: AtomicUsize,
    db: AtomicUsize,
    timeout_ms: u64,
}

impl FaultPlan {
    /// Parse `label:count` pairs (`disconnect`, `429`/`rate_limit`, `timeout`, `db`).
    ///
    /// Unknown labels and malformed counts are skipped with a warning.
    pub fn parse(input: &str) -> Self {
        let plan = FaultPlan {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            ..Default::default()
        };

        for entry in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let Some((label, count)) = entry.split_once(':') else {
                tracing::warn!(entry, "[faults] Missing count, expected label:count");
                continue;
            };
            let Ok(count) = count.trim().parse::<usize>() else {
                tracing::warn!(entry, "[faults] Invalid fault count");
                continue;
            };
            match label.trim() {
                "disconnect" => plan.disconnect.store(count, Ordering::Relaxed),
                "429" | "rate_limit" => plan.rate_limit.store(count, Ordering::Relaxed),
                "timeout" => plan.timeout.store(count, Ordering::Relaxed),
                "db" => plan.db.store(count, Ordering::Relaxed),
                other => tracing::warn!("[faults] Unknown fault type: {other}"),
            }
        }

        plan
    }

    /// Plan from `SOLEBOX_FAULTS`, or `None` when unset.
    pub fn from_env() -> Option<Self> {
        let raw = std::env::var(FAULTS_ENV).ok()?;
        let timeout_ms = std::env::var(FAULTS_TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        let plan = Self::parse(&raw).with_timeout_ms(timeout_ms);

        let counts = plan.remaining();
        tracing::info!(
            disconnect = counts.disconnect,
            rate_limit = counts.rate_limit,
            timeout = counts.timeout,
            db = counts.db,
            "[faults] Fault plan loaded"
        );
        Some(plan)
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Consume and return the next fault, if any remain.
    ///
    /// Priority: disconnect, rate limit, timeout, db.
    pub fn next_fault(&self) -> Option<InjectedFault> {
        let candidates = [
            (&self.disconnect, InjectedFault::Disconnect),
            (&self.rate_limit, InjectedFault::RateLimit),
            (
                &self.timeout,
                InjectedFault::Timeout {
                    duration_ms: self.timeout_ms,
                },
            ),
            (&self.db, InjectedFault::Db),
        ];

        for (counter, fault) in candidates {
            if take_one(counter) {
                tracing::warn!(fault = %fault, "[faults] Injecting fault");
                return Some(fault);
            }
        }
        None
    }

    /// `Err` with the next fault if one fires, for use as `plan.check()?`.
    pub fn check(&self) -> Result<(), InjectedFault> {
        match self.next_fault() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    pub fn remaining(&self) -> FaultCounts {
        FaultCounts {
            disconnect: self.disconnect.load(Ordering::Relaxed),
            rate_limit: self.rate_limit.load(Ordering::Relaxed),
            timeout: self.timeout.load(Ordering::Relaxed),
            db: self.db.load(Ordering::Relaxed),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == FaultCounts::default()
    }
}

/// Decrement `counter` if positive; never wraps below zero.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    #[test]
    fn test_parse_counts() {
        let plan = FaultPlan::parse("timeout:2, 429:1,disconnect:1,db:3,bogus:9,oops");
        assert_eq!(
            plan.remaining(),
            FaultCounts {
                disconnect: 1,
                rate_limit: 1,
                timeout: 2,
                db: 3,
            }
        );
    }

    #[test]
    fn test_priority_and_exhaustion() {
        let plan = FaultPlan::parse("timeout:1,429:1,disconnect:1,db:1").with_timeout_ms(5_000);

        assert_eq!(plan.next_fault(), Some(InjectedFault::Disconnect));
        assert_eq!(plan.next_fault(), Some(InjectedFault::RateLimit));
        assert_eq!(
            plan.next_fault(),
            Some(InjectedFault::Timeout { duration_ms: 5_000 })
        );
        assert_eq!(plan.next_fault(), Some(InjectedFault::Db));
        assert_eq!(plan.next_fault(), None);
        assert!(plan.is_exhausted());
        assert!(plan.check().is_ok());
    }

    #[test]
    fn test_faults_are_retryable() {
        let faults = [
            InjectedFault::Disconnect,
            InjectedFault::RateLimit,
            InjectedFault::Timeout { duration_ms: 10 },
            InjectedFault::Db,
        ];
        for fault in faults {
            assert!(fault.is_retryable(), "{fault}");
            let err = fault.clone().into_error();
            assert!(err.is_retryable(), "{fault} as error");
            assert!(err.to_string().contains("fault injected"));
        }
    }

    #[test]
    fn test_db_fault_is_typed() {
        let err = InjectedFault::Db.into_error();
        assert!(err.downcast_ref::<DbError>().is_some());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        unsafe {
            std::env::remove_var(FAULTS_ENV);
        }
        assert!(FaultPlan::from_env().is_none());

        unsafe {
            std::env::set_var(FAULTS_ENV, "429:2");
            std::env::set_var(FAULTS_TIMEOUT_ENV, "1500");
        }
        let plan = FaultPlan::from_env().unwrap();
        assert_eq!(plan.remaining().rate_limit, 2);
        assert_eq!(plan.timeout_ms, 1_500);

        unsafe {
            std::env::remove_var(FAULTS_ENV);
            std::env::remove_var(FAULTS_TIMEOUT_ENV);
        }
    }
}
