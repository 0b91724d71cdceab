//! Bounded log entry buffer for SoleBox.
//!
//! Entries accumulate in a fixed-capacity buffer. The buffer hands its
//! contents back as a batch when it fills up or when a CRITICAL entry
//! arrives; the caller ships that batch to a [`LogSink`].

mod entry;
mod sink;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use entry::{ErrorInfo, LogContext, LogEntry, LogLevel, UNSERIALIZABLE};
pub use sink::{JsonLinesSink, LogSink, MemorySink, NullSink, SinkError};

/// Default number of entries held before a flush.
pub const DEFAULT_CAPACITY: usize = 100;

/// Thread-safe entry buffer. Clones share the same storage.
#[derive(Clone)]
pub struct LogBuffer {
    inner: Arc<Mutex<EntryRing>>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBuffer {
    /// Create a buffer with the default capacity (100 entries).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a buffer holding at most `capacity` entries (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EntryRing::new(capacity.max(1)))),
        }
    }

    /// Append an entry.
    ///
    /// Returns the drained batch when this entry filled the buffer or was
    /// CRITICAL; the buffer is empty afterwards.
    pub fn push(&self, entry: LogEntry) -> Option<Vec<LogEntry>> {
        let mut guard = self.lock();
        let critical = entry.is_critical();
        guard.entries.push(entry);
        if critical || guard.entries.len() >= guard.capacity {
            Some(std::mem::take(&mut guard.entries))
        } else {
            None
        }
    }

    /// Remove and return everything currently buffered.
    pub fn drain(&self) -> Vec<LogEntry> {
        std::mem::take(&mut self.lock().entries)
    }

    /// Copy of the buffered entries, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    // A panic while holding the lock must not disable logging.
    fn lock(&self) -> MutexGuard<'_, EntryRing> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct EntryRing {
    capacity: usize,
    entries: Vec<LogEntry>,
}

impl EntryRing {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn info(msg: &str) -> LogEntry {
        LogEntry::new(LogLevel::Info, msg)
    }

    #[test]
    fn flushes_when_capacity_reached() {
        let buffer = LogBuffer::with_capacity(3);
        assert!(buffer.push(info("a")).is_none());
        assert!(buffer.push(info("b")).is_none());
        let batch = buffer.push(info("c")).expect("third entry fills the buffer");
        let messages: Vec<_> = batch.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["a", "b", "c"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn critical_entry_flushes_immediately() {
        let buffer = LogBuffer::with_capacity(100);
        buffer.push(info("before"));
        let batch = buffer
            .push(LogEntry::new(LogLevel::Critical, "down"))
            .expect("critical flushes");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].level, LogLevel::Critical);
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let buffer = LogBuffer::with_capacity(0);
        assert_eq!(buffer.capacity(), 1);
        assert!(buffer.push(info("only")).is_some());
    }

    #[test]
    fn clones_share_storage() {
        let buffer = LogBuffer::new();
        let other = buffer.clone();
        buffer.push(info("shared"));
        assert_eq!(other.snapshot().len(), 1);
        assert_eq!(other.drain().len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn survives_poisoned_lock() {
        let buffer = LogBuffer::new();
        let poisoner = buffer.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("poison the buffer");
        })
        .join();
        buffer.push(info("still works"));
        assert_eq!(buffer.len(), 1);
    }
}
