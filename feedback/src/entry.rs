//! Log entry model shared by the logger, the buffer and every sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Placeholder stored when a context value cannot be serialized.
pub const UNSERIALIZABLE: &str = "[unserializable]";

/// Severity of a log entry, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error details extracted from a failure at log time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorInfo {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            code: None,
        }
    }

    /// Build from any `std::error::Error`.
    ///
    /// The name is the short type name of `E`; the source chain is rendered
    /// into `stack`, one cause per line.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut info = Self::new(short_type_name::<E>(), err.to_string());
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        if !chain.is_empty() {
            info.stack = Some(chain.join("\n"));
        }
        info
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

fn short_type_name<E: ?Sized>() -> String {
    let full = std::any::type_name::<E>();
    // Drop generic arguments before taking the last path segment.
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Open, string-keyed context attached to an entry.
///
/// Insertion never fails: values that refuse to serialize are stored as
/// [`UNSERIALIZABLE`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogContext(Map<String, Value>);

impl LogContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T>(mut self, key: impl Into<String>, value: T) -> Self
    where
        T: Serialize,
    {
        self.insert(key, value);
        self
    }

    pub fn insert<T>(&mut self, key: impl Into<String>, value: T)
    where
        T: Serialize,
    {
        let value = serde_json::to_value(value).unwrap_or_else(|_| Value::from(UNSERIALIZABLE));
        self.0.insert(key.into(), value);
    }

    /// Copy every key of `other` into `self`, overwriting duplicates.
    pub fn merge(&mut self, other: LogContext) {
        self.0.extend(other.0);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for LogContext {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A single immutable log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<LogContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            context: None,
            error: None,
        }
    }

    pub fn with_context(mut self, context: Option<LogContext>) -> Self {
        self.context = context.filter(|ctx| !ctx.is_empty());
        self
    }

    pub fn with_error(mut self, error: Option<ErrorInfo>) -> Self {
        self.error = error;
        self
    }

    pub fn is_critical(&self) -> bool {
        self.level == LogLevel::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer {
        #[source]
        inner: std::io::Error,
    }

    struct Refuses;

    impl Serialize for Refuses {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("refusing to serialize"))
        }
    }

    #[test]
    fn levels_order_by_severity() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Error < LogLevel::Critical);
        assert_eq!(LogLevel::Warn.to_string(), "WARN");
    }

    #[test]
    fn error_info_renders_source_chain() {
        let err = Outer {
            inner: std::io::Error::other("disk gone"),
        };
        let info = ErrorInfo::from_error(&err);
        assert_eq!(info.name, "Outer");
        assert_eq!(info.message, "outer failure");
        assert_eq!(info.stack.as_deref(), Some("caused by: disk gone"));
    }

    #[test]
    fn context_tolerates_unserializable_values() {
        let ctx = LogContext::new().with("ok", 1).with("bad", Refuses);
        assert_eq!(ctx.get("ok"), Some(&Value::from(1)));
        assert_eq!(ctx.get("bad"), Some(&Value::from(UNSERIALIZABLE)));
    }

    #[test]
    fn empty_context_is_dropped_from_entry() {
        let entry = LogEntry::new(LogLevel::Info, "hello").with_context(Some(LogContext::new()));
        assert!(entry.context.is_none());
    }

    #[test]
    fn entry_serializes_uppercase_level() {
        let entry = LogEntry::new(LogLevel::Critical, "boom");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["level"], "CRITICAL");
        assert!(json.get("error").is_none());
    }
}
