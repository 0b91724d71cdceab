//! Error taxonomy for the HTTP boundary and the database layer.
//!
//! Both layers answer the same three questions for a failure: what the user
//! sees, whether an automatic retry is safe, and whether more logging is
//! warranted.

pub mod api;
pub mod db;

pub use api::{
    ApiError, ApiErrorBody, ApiErrorResponse, ApiResponse, ApiSuccessResponse, ErrorCode,
    ErrorContext, Failure, create_error_response, handle_error, is_retryable_error,
    success_response, validate_required,
};
pub use db::{
    DbError, DbErrorInfo, DbErrorKind, ParsedDbError, extract_field_name, handle_db_error,
    parse_db_error,
};
