//! HTTP-facing error taxonomy and the JSON envelope every API caller parses.
//!
//! ```json
//! {"success": false, "error": {"code": "NOT_FOUND", "message": "...", "details": {...}, "requestId": "..."}}
//! ```

use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use solebox_feedback::{ErrorInfo, LogContext};

use super::db::{DbError, DbErrorKind, ParsedDbError};
use crate::logging::StructuredLogger;
use crate::retry::{
    ErrorClass, PermanentError, RetryClassifiable, RetryableError, UntypedError,
};

/// Closed set of codes an API caller can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,
    Conflict,
    RateLimited,
    InternalError,
    ServiceUnavailable,
    Timeout,
    DatabaseError,
    StorageError,
    InvalidRequest,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 12] = [
        ErrorCode::ValidationError,
        ErrorCode::NotFound,
        ErrorCode::Unauthorized,
        ErrorCode::Forbidden,
        ErrorCode::Conflict,
        ErrorCode::RateLimited,
        ErrorCode::InternalError,
        ErrorCode::ServiceUnavailable,
        ErrorCode::Timeout,
        ErrorCode::DatabaseError,
        ErrorCode::StorageError,
        ErrorCode::InvalidRequest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::ValidationError | ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InternalError | ErrorCode::DatabaseError | ErrorCode::StorageError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Canned user-facing message.
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "Invalid input provided",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::Unauthorized => "Authentication required",
            ErrorCode::Forbidden => "You do not have permission to perform this action",
            ErrorCode::Conflict => "Resource already exists or conflicts with existing data",
            ErrorCode::RateLimited => "Too many requests. Please try again later",
            ErrorCode::InternalError => "An unexpected error occurred",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::Timeout => "Request timed out",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::StorageError => "Storage operation failed",
            ErrorCode::InvalidRequest => "Invalid request",
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::Timeout
                | ErrorCode::ServiceUnavailable
                | ErrorCode::RateLimited
                | ErrorCode::DatabaseError
                | ErrorCode::StorageError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a client may safely retry a request that failed with `code`.
pub fn is_retryable_error(code: ErrorCode) -> bool {
    code.is_retryable()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Error variant of the envelope; `success` is always `false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub success: bool,
    pub error: ApiErrorBody,
}

impl ApiErrorResponse {
    pub fn code(&self) -> ErrorCode {
        self.error.code
    }

    pub fn status(&self) -> StatusCode {
        self.error.code.status()
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

/// Success variant of the envelope; `success` is always `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSuccessResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> IntoResponse for ApiSuccessResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Either half of the envelope, as seen by a client decoding a body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiResponse<T> {
    Success(ApiSuccessResponse<T>),
    Error(ApiErrorResponse),
}

impl<T> ApiResponse<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ApiResponse::Success(_))
    }
}

/// Build the error envelope for `code`, using its canned message unless one is given.
pub fn create_error_response(
    code: ErrorCode,
    custom_message: Option<&str>,
    details: Option<Value>,
    request_id: Option<&str>,
) -> ApiErrorResponse {
    ApiErrorResponse {
        success: false,
        error: ApiErrorBody {
            code,
            message: custom_message
                .map(str::to_string)
                .unwrap_or_else(|| code.default_message().to_string()),
            details,
            request_id: request_id.map(str::to_string),
        },
    }
}

pub fn success_response<T: Serialize>(data: T) -> ApiSuccessResponse<T> {
    ApiSuccessResponse {
        success: true,
        data,
    }
}

/// Typed API failure raised at its origin.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn to_response(&self, request_id: Option<&str>) -> ApiErrorResponse {
        create_error_response(
            self.code,
            Some(&self.message),
            self.details.clone(),
            request_id,
        )
    }
}

impl From<ErrorCode> for ApiError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.to_response(None).into_response()
    }
}

impl RetryClassifiable for ApiError {
    fn classify(&self) -> ErrorClass {
        let message = self.message.clone();
        match self.code {
            ErrorCode::Timeout => ErrorClass::Retryable(RetryableError::NetworkTimeout),
            ErrorCode::RateLimited => ErrorClass::Retryable(RetryableError::RateLimited),
            ErrorCode::ServiceUnavailable | ErrorCode::StorageError => {
                ErrorClass::Retryable(RetryableError::ServiceUnavailable)
            }
            ErrorCode::DatabaseError => ErrorClass::Retryable(RetryableError::DatabaseTransient),
            ErrorCode::ValidationError | ErrorCode::InvalidRequest => {
                ErrorClass::Permanent(PermanentError::InvalidInput(message))
            }
            ErrorCode::Unauthorized => ErrorClass::Permanent(PermanentError::Unauthorized(message)),
            ErrorCode::Forbidden => ErrorClass::Permanent(PermanentError::Forbidden(message)),
            ErrorCode::NotFound => ErrorClass::Permanent(PermanentError::ResourceNotFound(message)),
            ErrorCode::Conflict => ErrorClass::Permanent(PermanentError::Conflict(message)),
            ErrorCode::InternalError => ErrorClass::Permanent(PermanentError::Unclassified(message)),
        }
    }
}

/// Whatever reached the HTTP boundary.
#[derive(Debug)]
pub enum Failure {
    /// A real error value, typed or not
    Error(anyhow::Error),
    /// A structured non-error payload (e.g. a decoded upstream error body)
    Object(Value),
    /// Anything else, already stringified
    Other(String),
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Failure::Error(err)
    }
}

impl From<ApiError> for Failure {
    fn from(err: ApiError) -> Self {
        Failure::Error(err.into())
    }
}

impl From<DbError> for Failure {
    fn from(err: DbError) -> Self {
        Failure::Error(err.into())
    }
}

impl From<ParsedDbError> for Failure {
    fn from(err: ParsedDbError) -> Self {
        Failure::Error(err.into())
    }
}

impl From<UntypedError> for Failure {
    fn from(err: UntypedError) -> Self {
        Failure::Error(err.into())
    }
}

impl From<Value> for Failure {
    fn from(value: Value) -> Self {
        Failure::Object(value)
    }
}

impl From<String> for Failure {
    fn from(text: String) -> Self {
        Failure::Other(text)
    }
}

impl From<&str> for Failure {
    fn from(text: &str) -> Self {
        Failure::Other(text.to_string())
    }
}

/// Request attributes attached to the error log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub route: Option<String>,
    pub method: Option<String>,
    pub user_id: Option<String>,
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    fn to_log_context(&self) -> LogContext {
        let mut ctx = LogContext::new();
        let fields = [
            ("route", &self.route),
            ("method", &self.method),
            ("userId", &self.user_id),
            ("requestId", &self.request_id),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                ctx.insert(key, value);
            }
        }
        ctx
    }
}

/// Translate any failure into the JSON error envelope and log it.
pub fn handle_error(
    logger: &StructuredLogger,
    failure: Failure,
    context: Option<&ErrorContext>,
) -> Response {
    let request_id = context.and_then(|c| c.request_id.as_deref());
    let log_context = context.map(ErrorContext::to_log_context).unwrap_or_default();

    let response = match failure {
        Failure::Error(err) => {
            let (code, message, details) = classify_error(&err);
            logger.error_with(
                "API error",
                describe_error(&err),
                Some(log_context.with("code", code.as_str())),
            );
            create_error_response(code, Some(&message), details, request_id)
        }
        Failure::Object(value) => {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string();
            logger.error(
                "API error (non-error value)",
                Some(log_context.with("error", &value)),
            );
            create_error_response(
                ErrorCode::InternalError,
                Some(&message),
                Some(value),
                request_id,
            )
        }
        Failure::Other(text) => {
            logger.error(
                "API error (unknown value)",
                Some(log_context.with("error", &text)),
            );
            create_error_response(ErrorCode::InternalError, None, None, request_id)
        }
    };

    response.into_response()
}

fn classify_error(err: &anyhow::Error) -> (ErrorCode, String, Option<Value>) {
    if let Some(api) = err.downcast_ref::<ApiError>() {
        return (api.code, api.message.clone(), api.details.clone());
    }
    if let Some(db) = err.downcast_ref::<DbError>() {
        return (ErrorCode::DatabaseError, db.user_message(), None);
    }
    if let Some(parsed) = err.downcast_ref::<ParsedDbError>() {
        let message = DbErrorKind::classify(parsed).user_message();
        return (ErrorCode::DatabaseError, message, None);
    }

    let message = err.to_string();
    (code_for_message(&message), message, None)
}

/// Message sniffing for untyped errors; first match wins.
fn code_for_message(message: &str) -> ErrorCode {
    let lower = message.to_lowercase();
    if lower.contains("validation") || lower.contains("invalid") {
        ErrorCode::ValidationError
    } else if lower.contains("not found") {
        ErrorCode::NotFound
    } else if lower.contains("unauthorized") {
        ErrorCode::Unauthorized
    } else if lower.contains("permission") {
        ErrorCode::Forbidden
    } else if lower.contains("timeout") || lower.contains("timed out") {
        ErrorCode::Timeout
    } else if lower.contains("database") {
        ErrorCode::DatabaseError
    } else {
        ErrorCode::InternalError
    }
}

fn describe_error(err: &anyhow::Error) -> ErrorInfo {
    let (name, code) = if let Some(api) = err.downcast_ref::<ApiError>() {
        ("ApiError", Some(api.code.to_string()))
    } else if let Some(db) = err.downcast_ref::<DbError>() {
        ("DbError", Some(db.parsed().code.clone()))
    } else if let Some(parsed) = err.downcast_ref::<ParsedDbError>() {
        ("DbError", Some(parsed.code.clone()))
    } else if let Some(untyped) = err.downcast_ref::<UntypedError>() {
        ("UntypedError", untyped.code.as_ref().map(ToString::to_string))
    } else {
        ("Error", None)
    };

    let mut info = ErrorInfo::new(name, err.to_string());
    if let Some(code) = code {
        info = info.with_code(code);
    }
    let chain: Vec<String> = err
        .chain()
        .skip(1)
        .map(|cause| format!("caused by: {cause}"))
        .collect();
    if !chain.is_empty() {
        info = info.with_stack(chain.join("\n"));
    }
    info
}

/// First required field that is absent or falsy, as a user-facing message.
///
/// Falsy follows loose truthiness: `null`, `false`, `0` and `""` all count as missing.
pub fn validate_required(data: &Value, required_fields: &[&str]) -> Option<String> {
    required_fields
        .iter()
        .find(|field| data.get(**field).is_none_or(is_falsy))
        .map(|field| format!("Missing required field: {field}"))
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().is_none_or(|f| f == 0.0 || f.is_nan()),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}
