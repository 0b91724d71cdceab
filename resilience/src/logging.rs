//! Structured logger
//!
//! Every call produces an immutable [`LogEntry`] that is appended to a
//! bounded buffer and, in development, echoed to the console through
//! `tracing`. The buffer ships its batch to a [`LogSink`] when it fills up
//! or when a CRITICAL entry arrives.
//!
//! Logging never fails the caller: sink errors and sink panics are
//! swallowed, poisoned locks are recovered, and unserializable context
//! values are replaced with a placeholder.

use std::fmt::Display;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use solebox_feedback::{
    DEFAULT_CAPACITY, ErrorInfo, LogBuffer, LogContext, LogEntry, LogLevel, LogSink, NullSink,
};
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;

use crate::config::ResilienceConfig;

/// Logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Entries held before the buffer ships a batch
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Console echo; follows the environment when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console: Option<bool>,

    /// Filter directive used when RUST_LOG is unset
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_buffer_capacity() -> usize {
    DEFAULT_CAPACITY
}
fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            console: None,
            filter: default_filter(),
        }
    }
}

/// Install the global `tracing` subscriber used for console output.
///
/// `RUST_LOG` takes precedence over `config.filter`. Returns `false` when a
/// subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new("%H:%M:%S".to_string()))
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Correlation id for one request: `<epoch-ms>-<9 lowercase alphanumerics>`.
pub fn generate_request_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}-{suffix}", Utc::now().timestamp_millis())
}

/// Cheap-to-clone handle; clones share the buffer and sink.
#[derive(Clone)]
pub struct StructuredLogger {
    inner: Arc<LoggerInner>,
}

struct LoggerInner {
    console: bool,
    include_stack: bool,
    buffer: LogBuffer,
    sink: Arc<dyn LogSink>,
}

impl StructuredLogger {
    pub fn new(config: &ResilienceConfig, sink: Arc<dyn LogSink>) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                console: config.console_logging(),
                include_stack: config.environment.is_development(),
                buffer: LogBuffer::with_capacity(config.logging.buffer_capacity),
                sink,
            }),
        }
    }

    /// Logger with default settings that discards flushed batches.
    pub fn disabled() -> Self {
        Self::new(&ResilienceConfig::default(), Arc::new(NullSink))
    }

    pub fn debug(&self, message: impl Into<String>, context: Option<LogContext>) {
        self.log(LogLevel::Debug, message.into(), None, context);
    }

    pub fn info(&self, message: impl Into<String>, context: Option<LogContext>) {
        self.log(LogLevel::Info, message.into(), None, context);
    }

    pub fn warn(&self, message: impl Into<String>, context: Option<LogContext>) {
        self.log(LogLevel::Warn, message.into(), None, context);
    }

    pub fn error(&self, message: impl Into<String>, context: Option<LogContext>) {
        self.log(LogLevel::Error, message.into(), None, context);
    }

    pub fn error_with(
        &self,
        message: impl Into<String>,
        error: ErrorInfo,
        context: Option<LogContext>,
    ) {
        self.log(LogLevel::Error, message.into(), Some(error), context);
    }

    pub fn critical(&self, message: impl Into<String>, context: Option<LogContext>) {
        self.log(LogLevel::Critical, message.into(), None, context);
    }

    pub fn critical_with(
        &self,
        message: impl Into<String>,
        error: ErrorInfo,
        context: Option<LogContext>,
    ) {
        self.log(LogLevel::Critical, message.into(), Some(error), context);
    }

    /// Ship whatever is buffered now, regardless of size.
    pub fn flush(&self) {
        let batch = self.inner.buffer.drain();
        if !batch.is_empty() {
            self.ship(batch);
        }
    }

    /// Entries buffered since the last flush, oldest first.
    pub fn buffered(&self) -> Vec<LogEntry> {
        self.inner.buffer.snapshot()
    }

    /// Time a fallible future, logging completion or failure with its duration.
    pub async fn measure_async<T, E, Fut>(&self, label: &str, fut: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let start = Instant::now();
        let result = fut.await;
        let duration_ms = rounded_ms(start.elapsed());
        match &result {
            Ok(_) => self.info(
                format!("{label} completed"),
                Some(LogContext::new().with("duration_ms", duration_ms)),
            ),
            Err(err) => self.error(
                format!("{label} failed"),
                Some(
                    LogContext::new()
                        .with("duration_ms", duration_ms)
                        .with("error", err.to_string()),
                ),
            ),
        }
        result
    }

    fn log(
        &self,
        level: LogLevel,
        message: String,
        mut error: Option<ErrorInfo>,
        context: Option<LogContext>,
    ) {
        if !self.inner.include_stack
            && let Some(err) = error.as_mut()
        {
            err.stack = None;
        }
        let entry = LogEntry::new(level, message)
            .with_context(context)
            .with_error(error);

        if self.inner.console {
            emit_console(&entry);
        }

        if let Some(batch) = self.inner.buffer.push(entry) {
            self.ship(batch);
        }
    }

    fn ship(&self, batch: Vec<LogEntry>) {
        let sink = &self.inner.sink;
        match catch_unwind(AssertUnwindSafe(|| sink.ship(&batch))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(error = %err, dropped = batch.len(), "Log sink rejected batch");
            }
            Err(_) => {
                tracing::warn!(dropped = batch.len(), "Log sink panicked while shipping batch");
            }
        }
    }
}

fn rounded_ms(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round()
}

fn emit_console(entry: &LogEntry) {
    let context = entry
        .context
        .as_ref()
        .and_then(|ctx| serde_json::to_string(ctx).ok())
        .unwrap_or_default();
    let error = entry
        .error
        .as_ref()
        .map(|e| format!("{}: {}", e.name, e.message))
        .unwrap_or_default();
    let message = entry.message.as_str();

    match entry.level {
        LogLevel::Debug => tracing::debug!(context = %context, error = %error, "{message}"),
        LogLevel::Info => tracing::info!(context = %context, error = %error, "{message}"),
        LogLevel::Warn => tracing::warn!(context = %context, error = %error, "{message}"),
        LogLevel::Error => tracing::error!(context = %context, error = %error, "{message}"),
        LogLevel::Critical => {
            tracing::error!(critical = true, context = %context, error = %error, "{message}")
        }
    }
}
