//! Destinations for flushed log batches.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use crate::entry::LogEntry;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write log batch to {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize log entry: {source}")]
    Serialize { source: serde_json::Error },
}

/// Receives a batch every time the buffer flushes.
pub trait LogSink: Send + Sync {
    fn ship(&self, batch: &[LogEntry]) -> Result<(), SinkError>;
}

/// Discards every batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn ship(&self, _batch: &[LogEntry]) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps shipped batches in memory for inspection.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<Vec<LogEntry>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<LogEntry>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Total number of entries shipped so far.
    pub fn entry_count(&self) -> usize {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Vec::len)
            .sum()
    }
}

impl LogSink for MemorySink {
    fn ship(&self, batch: &[LogEntry]) -> Result<(), SinkError> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(batch.to_vec());
        Ok(())
    }
}

/// Appends one JSON object per entry to a file.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl LogSink for JsonLinesSink {
    fn ship(&self, batch: &[LogEntry]) -> Result<(), SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        let mut writer = BufWriter::new(file);
        for entry in batch {
            let line =
                serde_json::to_string(entry).map_err(|source| SinkError::Serialize { source })?;
            writeln!(writer, "{line}").map_err(|e| self.io_err(e))?;
        }
        writer.flush().map_err(|e| self.io_err(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::LogLevel;
    use pretty_assertions::assert_eq;

    #[test]
    fn memory_sink_records_batches() {
        let sink = MemorySink::new();
        let batch = vec![
            LogEntry::new(LogLevel::Info, "a"),
            LogEntry::new(LogLevel::Warn, "b"),
        ];
        sink.ship(&batch).unwrap();
        sink.ship(&batch[..1]).unwrap();
        assert_eq!(sink.batches().len(), 2);
        assert_eq!(sink.entry_count(), 3);
    }

    #[test]
    fn json_lines_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path().join("logs.jsonl"));
        sink.ship(&[LogEntry::new(LogLevel::Info, "first")]).unwrap();
        sink.ship(&[LogEntry::new(LogLevel::Error, "second")]).unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<LogEntry> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].message, "first");
        assert_eq!(lines[1].level, LogLevel::Error);
    }

    #[test]
    fn json_lines_sink_reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path().join("missing").join("logs.jsonl"));
        let err = sink.ship(&[LogEntry::new(LogLevel::Info, "x")]).unwrap_err();
        assert!(matches!(err, SinkError::Io { .. }));
    }
}
