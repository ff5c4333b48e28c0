//! Logging collaborator
//!
//! Programs log through `log.info/note/error(...)` and the controller's
//! `log_*` methods. Where the messages end up is the host's choice.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Note,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "info",
            LogLevel::Note => "note",
            LogLevel::Error => "error",
        };
        write!(f, "{}", s)
    }
}

pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(LogLevel, &str) + Send + Sync,
{
    fn log(&self, level: LogLevel, message: &str) {
        self(level, message)
    }
}

/// Forwards program messages to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => tracing::info!(target: "synchro::program", "{}", message),
            LogLevel::Note => tracing::info!(target: "synchro::program", note = true, "{}", message),
            LogLevel::Error => tracing::error!(target: "synchro::program", "{}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Keeps every message in memory; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Messages only, in order
    pub fn messages(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.message.clone()).collect()
    }

    pub fn messages_at(&self, level: LogLevel) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.level == level)
            .map(|r| r.message.clone())
            .collect()
    }

    pub fn count(&self, message: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.message == message)
            .count()
    }
}

impl LogSink for MemoryLog {
    fn log(&self, level: LogLevel, message: &str) {
        self.records.lock().push(LogRecord {
            at: Utc::now(),
            level,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_log_shares_buffer() {
        let log = MemoryLog::new();
        let clone = log.clone();
        clone.log(LogLevel::Info, "hello");
        clone.log(LogLevel::Error, "boom");
        assert_eq!(log.messages(), vec!["hello", "boom"]);
        assert_eq!(log.messages_at(LogLevel::Error), vec!["boom"]);
        assert_eq!(log.count("hello"), 1);
    }

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let sink = move |level: LogLevel, msg: &str| captured.lock().push(format!("{}:{}", level, msg));
        sink.log(LogLevel::Note, "x");
        assert_eq!(*seen.lock(), vec!["note:x".to_string()]);
    }
}
