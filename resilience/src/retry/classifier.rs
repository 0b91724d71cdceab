//! Error classification for retry decisions
//!
//! Typed errors classify themselves through [`RetryClassifiable`]. Untyped
//! third-party failures (a message plus an optional code) go through
//! [`classify_untyped`], the one place that sniffs message text.

use std::fmt;

/// Top-level error classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient errors that should be retried with backoff
    Retryable(RetryableError),

    /// Permanent errors that should NOT be retried
    Permanent(PermanentError),
}

/// Transient errors (retry recommended)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryableError {
    #[error("Network timeout")]
    NetworkTimeout,

    #[error("Connection failed")]
    ConnectionFailure,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Upstream service unavailable")]
    ServiceUnavailable,

    #[error("Transient database condition")]
    DatabaseTransient,
}

/// Permanent errors (do NOT retry)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermanentError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("{0}")]
    Unclassified(String),
}

/// Trait for error classification
pub trait RetryClassifiable {
    fn classify(&self) -> ErrorClass;

    fn is_retryable(&self) -> bool {
        matches!(self.classify(), ErrorClass::Retryable(_))
    }
}

/// Retry verdict for any classifiable error.
pub fn is_retryable<E>(err: &E) -> bool
where
    E: RetryClassifiable + ?Sized,
{
    err.is_retryable()
}

/// Code attached to an untyped failure: HTTP-ish numbers or SQLSTATE-ish text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawCode {
    Numeric(i64),
    Text(String),
}

impl fmt::Display for RawCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawCode::Numeric(n) => write!(f, "{n}"),
            RawCode::Text(s) => f.write_str(s),
        }
    }
}

/// A failure from a third-party source that carries no type information.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct UntypedError {
    pub message: String,
    pub code: Option<RawCode>,
}

impl UntypedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_status(mut self, status: i64) -> Self {
        self.code = Some(RawCode::Numeric(status));
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(RawCode::Text(code.into()));
        self
    }
}

impl RetryClassifiable for UntypedError {
    fn classify(&self) -> ErrorClass {
        classify_untyped(&self.message, self.code.as_ref())
    }
}

const NETWORK_PATTERNS: &[&str] = &[
    "timeout",
    "etimedout",
    "timed out",
    "econnrefused",
    "econnreset",
    "enotfound",
    "socket hang up",
    "connection refused",
    "connection reset",
];

const TRANSIENT_DB_PATTERNS: &[&str] = &["database", "connection", "unavailable", "temporarily"];

/// SQLSTATE codes for a lost connection and a server in recovery.
const TRANSIENT_DB_CODES: &[&str] = &["08006", "57P03"];

/// Classify an untyped failure from its message and optional code.
pub fn classify_untyped(message: &str, code: Option<&RawCode>) -> ErrorClass {
    let lower = message.to_lowercase();

    if NETWORK_PATTERNS.iter().any(|p| lower.contains(p)) {
        let kind = if lower.contains("time") {
            RetryableError::NetworkTimeout
        } else {
            RetryableError::ConnectionFailure
        };
        return ErrorClass::Retryable(kind);
    }

    if matches!(code, Some(RawCode::Numeric(429))) || lower.contains("rate limit") {
        return ErrorClass::Retryable(RetryableError::RateLimited);
    }

    // Codes outside the informational..success range are treated as upstream faults,
    // including malformed ones below 100.
    if let Some(RawCode::Numeric(status)) = code
        && (*status >= 500 || *status < 100)
    {
        return ErrorClass::Retryable(RetryableError::ServiceUnavailable);
    }

    let transient_code =
        matches!(code, Some(RawCode::Text(c)) if TRANSIENT_DB_CODES.contains(&c.as_str()));
    if transient_code || TRANSIENT_DB_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorClass::Retryable(RetryableError::DatabaseTransient);
    }

    ErrorClass::Permanent(PermanentError::Unclassified(message.to_string()))
}

impl RetryClassifiable for std::io::Error {
    fn classify(&self) -> ErrorClass {
        use std::io::ErrorKind;

        match self.kind() {
            ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock => {
                ErrorClass::Retryable(RetryableError::NetworkTimeout)
            }
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted => {
                ErrorClass::Retryable(RetryableError::ConnectionFailure)
            }
            ErrorKind::NotFound => {
                ErrorClass::Permanent(PermanentError::ResourceNotFound(self.to_string()))
            }
            ErrorKind::PermissionDenied => {
                ErrorClass::Permanent(PermanentError::Forbidden(self.to_string()))
            }
            ErrorKind::InvalidInput | ErrorKind::InvalidData => {
                ErrorClass::Permanent(PermanentError::InvalidInput(self.to_string()))
            }
            // Other I/O errors: retry with caution
            _ => ErrorClass::Retryable(RetryableError::ServiceUnavailable),
        }
    }
}

impl RetryClassifiable for anyhow::Error {
    fn classify(&self) -> ErrorClass {
        if let Some(err) = self.downcast_ref::<crate::error::ApiError>() {
            return err.classify();
        }
        if let Some(err) = self.downcast_ref::<crate::error::DbError>() {
            return err.classify();
        }
        if let Some(err) = self.downcast_ref::<crate::error::ParsedDbError>() {
            return err.classify();
        }
        if let Some(err) = self.downcast_ref::<UntypedError>() {
            return err.classify();
        }
        if let Some(err) = self.downcast_ref::<std::io::Error>() {
            return err.classify();
        }
        classify_untyped(&self.to_string(), None)
    }
}
