//! Database error taxonomy
//!
//! Raw driver errors arrive as JSON (`{code?, message, details?, hint?, constraint?}`)
//! and are turned into a user-facing message plus a retry and logging verdict.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use solebox_feedback::{ErrorInfo, LogContext};

use crate::logging::StructuredLogger;
use crate::retry::{ErrorClass, PermanentError, RetryClassifiable, RetryableError};

const UNKNOWN_CODE: &str = "UNKNOWN";
const UNKNOWN_MESSAGE: &str = "Unknown database error";
const FALLBACK_FIELD: &str = "field";

/// SQLSTATE codes the classifier branches on.
pub mod sqlstate {
    pub const INSUFFICIENT_PRIVILEGE: &str = "42501";
    pub const NOT_NULL_VIOLATION: &str = "23502";
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const CHECK_VIOLATION: &str = "23514";
    pub const CONNECTION_FAILURE: &str = "08006";
    pub const QUERY_CANCELED: &str = "57014";
    pub const TOO_MANY_CONNECTIONS: &str = "53300";
}

/// Driver error with every field normalized to a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct ParsedDbError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
}

impl Default for ParsedDbError {
    fn default() -> Self {
        Self {
            code: UNKNOWN_CODE.to_string(),
            message: UNKNOWN_MESSAGE.to_string(),
            details: None,
            hint: None,
            constraint: None,
        }
    }
}

/// Extract the driver error fields from whatever the driver handed back.
///
/// Never fails: missing or oddly typed fields fall back to `"UNKNOWN"` and
/// `"Unknown database error"`; a bare string is taken as the message.
pub fn parse_db_error(error: &Value) -> ParsedDbError {
    let mut parsed = ParsedDbError::default();
    match error {
        Value::Object(_) => {
            if let Some(code) = text_field(error, "code") {
                parsed.code = code;
            }
            if let Some(message) = text_field(error, "message") {
                parsed.message = message;
            }
            parsed.details = text_field(error, "details");
            parsed.hint = text_field(error, "hint");
            parsed.constraint = text_field(error, "constraint");
        }
        Value::String(message) if !message.is_empty() => parsed.message = message.clone(),
        _ => {}
    }
    parsed
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Classification of a driver error, checked in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DbErrorKind {
    RlsViolation,
    NotNullViolation { field: String },
    UniqueViolation { field: String },
    ForeignKeyViolation,
    CheckViolation,
    ConnectionError,
    Timeout,
    TooManyConnections,
    Generic,
}

impl DbErrorKind {
    pub fn classify(error: &ParsedDbError) -> Self {
        let code = error.code.as_str();
        if rls_violation(error) {
            DbErrorKind::RlsViolation
        } else if code == sqlstate::NOT_NULL_VIOLATION {
            DbErrorKind::NotNullViolation {
                field: extract_field_name(&error.message),
            }
        } else if code == sqlstate::UNIQUE_VIOLATION {
            DbErrorKind::UniqueViolation {
                field: extract_field_name(&error.message),
            }
        } else if code == sqlstate::FOREIGN_KEY_VIOLATION {
            DbErrorKind::ForeignKeyViolation
        } else if code == sqlstate::CHECK_VIOLATION {
            DbErrorKind::CheckViolation
        } else if connection_error(error) {
            DbErrorKind::ConnectionError
        } else if code == sqlstate::QUERY_CANCELED
            || error.message.to_lowercase().contains("timeout")
        {
            DbErrorKind::Timeout
        } else if code == sqlstate::TOO_MANY_CONNECTIONS {
            DbErrorKind::TooManyConnections
        } else {
            DbErrorKind::Generic
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            DbErrorKind::RlsViolation => {
                "You do not have permission to perform this action".to_string()
            }
            DbErrorKind::NotNullViolation { field } => format!("Missing required field: {field}"),
            DbErrorKind::UniqueViolation { field } => {
                format!("A record with this {field} already exists")
            }
            DbErrorKind::ForeignKeyViolation => "Referenced record does not exist".to_string(),
            DbErrorKind::CheckViolation => "Invalid value provided".to_string(),
            DbErrorKind::ConnectionError => {
                "Unable to connect to the database. Please try again".to_string()
            }
            DbErrorKind::Timeout => "Database operation timed out. Please try again".to_string(),
            DbErrorKind::TooManyConnections => {
                "Database is busy. Please try again shortly".to_string()
            }
            DbErrorKind::Generic => "A database error occurred".to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DbErrorKind::ConnectionError
                | DbErrorKind::Timeout
                | DbErrorKind::TooManyConnections
                | DbErrorKind::Generic
        )
    }

    /// Whether logging beyond the entry `handle_db_error` already wrote is warranted.
    pub fn should_log(&self) -> bool {
        !matches!(self, DbErrorKind::RlsViolation)
    }
}

fn rls_violation(error: &ParsedDbError) -> bool {
    error.code == sqlstate::INSUFFICIENT_PRIVILEGE || error.message.contains("RLS")
}

fn connection_error(error: &ParsedDbError) -> bool {
    let lower = error.message.to_lowercase();
    error.code == sqlstate::CONNECTION_FAILURE
        || lower.contains("connection refused")
        || lower.contains("connection closed")
}

/// Column or constraint named by a driver message.
///
/// Prefers the first double-quoted token, then the word after "column"
/// (any case), then the literal `"field"`.
pub fn extract_field_name(message: &str) -> String {
    if let Some(quoted) = first_quoted(message) {
        return quoted.to_string();
    }

    let lower = message.to_ascii_lowercase();
    if let Some(idx) = lower.find("column") {
        let token: String = message[idx + "column".len()..]
            .trim_start()
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
            .collect();
        if !token.is_empty() {
            return token;
        }
    }

    FALLBACK_FIELD.to_string()
}

fn first_quoted(message: &str) -> Option<&str> {
    let (_, rest) = message.split_once('"')?;
    let (token, _) = rest.split_once('"')?;
    (!token.is_empty()).then_some(token)
}

/// Outcome of [`handle_db_error`].
#[derive(Debug, Clone, PartialEq)]
pub struct DbErrorInfo {
    pub kind: DbErrorKind,
    pub user_message: String,
    pub is_retryable: bool,
    pub should_log: bool,
    pub context: Option<LogContext>,
}

/// Log a driver error, then classify it.
pub fn handle_db_error(
    logger: &StructuredLogger,
    error: &Value,
    context: Option<LogContext>,
) -> DbErrorInfo {
    let parsed = parse_db_error(error);

    let mut log_context = LogContext::new()
        .with("code", &parsed.code)
        .with("message", &parsed.message)
        .with("details", &parsed.details)
        .with("hint", &parsed.hint);
    if let Some(caller) = &context {
        log_context.merge(caller.clone());
    }
    logger.error_with(
        "Database error",
        ErrorInfo::new("DbError", parsed.message.clone()).with_code(parsed.code.clone()),
        Some(log_context),
    );

    let kind = DbErrorKind::classify(&parsed);
    DbErrorInfo {
        user_message: kind.user_message(),
        is_retryable: kind.is_retryable(),
        should_log: kind.should_log(),
        kind,
        context,
    }
}

pub fn is_retryable(error: &Value) -> bool {
    DbErrorKind::classify(&parse_db_error(error)).is_retryable()
}

pub fn is_rls_violation(error: &Value) -> bool {
    rls_violation(&parse_db_error(error))
}

/// Integrity constraint violations (SQLSTATE class 23, subclass 5xx).
pub fn is_validation_error(error: &Value) -> bool {
    parse_db_error(error).code.starts_with("235")
}

pub fn is_connection_error(error: &Value) -> bool {
    connection_error(&parse_db_error(error))
}

/// Typed driver failure, raised by the database wrapper so callers never
/// classify raw driver text themselves.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} (code {})", .parsed.message, .parsed.code)]
pub struct DbError {
    parsed: ParsedDbError,
    kind: DbErrorKind,
}

impl DbError {
    pub fn new(parsed: ParsedDbError) -> Self {
        let kind = DbErrorKind::classify(&parsed);
        Self { parsed, kind }
    }

    pub fn from_value(error: &Value) -> Self {
        Self::new(parse_db_error(error))
    }

    /// A dropped connection, raised where the driver reports it.
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::new(ParsedDbError {
            code: sqlstate::CONNECTION_FAILURE.to_string(),
            message: message.into(),
            ..Default::default()
        })
    }

    pub fn parsed(&self) -> &ParsedDbError {
        &self.parsed
    }

    pub fn kind(&self) -> &DbErrorKind {
        &self.kind
    }

    pub fn user_message(&self) -> String {
        self.kind.user_message()
    }
}

impl DbErrorKind {
    fn retry_class(&self, message: &str) -> ErrorClass {
        let message = message.to_string();
        match self {
            DbErrorKind::ConnectionError => ErrorClass::Retryable(RetryableError::ConnectionFailure),
            DbErrorKind::Timeout => ErrorClass::Retryable(RetryableError::NetworkTimeout),
            DbErrorKind::TooManyConnections | DbErrorKind::Generic => {
                ErrorClass::Retryable(RetryableError::DatabaseTransient)
            }
            DbErrorKind::RlsViolation => ErrorClass::Permanent(PermanentError::Forbidden(message)),
            DbErrorKind::UniqueViolation { .. } => {
                ErrorClass::Permanent(PermanentError::Conflict(message))
            }
            DbErrorKind::NotNullViolation { .. }
            | DbErrorKind::ForeignKeyViolation
            | DbErrorKind::CheckViolation => {
                ErrorClass::Permanent(PermanentError::ConstraintViolation(message))
            }
        }
    }
}

impl RetryClassifiable for DbError {
    fn classify(&self) -> ErrorClass {
        self.kind.retry_class(&self.parsed.message)
    }
}

impl RetryClassifiable for ParsedDbError {
    fn classify(&self) -> ErrorClass {
        DbErrorKind::classify(self).retry_class(&self.message)
    }
}
