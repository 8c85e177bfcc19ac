//! Bounded per-instance log buffers.
//!
//! Each instance gets a FIFO ring of [`LogEntry`] values, created lazily on
//! the first append and dropped when the instance is removed. The store is
//! written by supervisor tasks and read by status pollers concurrently.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Default number of entries retained per instance.
pub const DEFAULT_LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        })
    }
}

/// One immutable log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Timestamp,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    /// `[2026-01-02 13:04:05] [INFO] message`
    pub fn format(&self) -> String {
        format!(
            "[{}] [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Instance id -> bounded ordered log buffer.
#[derive(Debug)]
pub struct LogStore {
    capacity: usize,
    buffers: RwLock<HashMap<String, VecDeque<LogEntry>>>,
}

impl LogStore {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffers: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn append(&self, instance_id: &str, level: LogLevel, message: impl Into<String>) {
        self.push(
            instance_id,
            LogEntry {
                timestamp: Utc::now(),
                level,
                message: message.into(),
            },
        );
    }

    pub fn push(&self, instance_id: &str, entry: LogEntry) {
        let mut buffers = self.buffers.write();
        let buf = buffers
            .entry(instance_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity.min(64)));
        if buf.len() == self.capacity {
            buf.pop_front();
        }
        buf.push_back(entry);
    }

    /// The last `max_lines` entries in insertion order; the whole buffer
    /// when `max_lines <= 0`. Unknown ids yield an empty list.
    pub fn entries(&self, instance_id: &str, max_lines: i64) -> Vec<LogEntry> {
        let buffers = self.buffers.read();
        let Some(buf) = buffers.get(instance_id) else {
            return Vec::new();
        };
        let skip = match usize::try_from(max_lines) {
            Ok(n) if n > 0 => buf.len().saturating_sub(n),
            _ => 0,
        };
        buf.iter().skip(skip).cloned().collect()
    }

    /// Formatted variant of [`LogStore::entries`].
    pub fn tail(&self, instance_id: &str, max_lines: i64) -> Vec<String> {
        self.entries(instance_id, max_lines)
            .iter()
            .map(LogEntry::format)
            .collect()
    }

    pub fn remove(&self, instance_id: &str) {
        self.buffers.write().remove(instance_id);
    }

    pub fn len(&self, instance_id: &str) -> usize {
        self.buffers.read().get(instance_id).map_or(0, VecDeque::len)
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.buffers.read().contains_key(instance_id)
    }
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
