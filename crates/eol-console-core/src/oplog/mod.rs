//! Operation Log
//!
//! Operator-visible log: a bounded FIFO of [`LogEntry`] per panel plus one
//! system log for the dashboard. This is not developer tracing; nothing in
//! here is ever forwarded to `tracing` or the other way round.

mod export;

pub use export::{export_file_name, ExportFormat, ExportedFile};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Smallest allowed per-panel capacity
pub const MIN_LOG_CAPACITY: usize = 100;
/// Largest allowed per-panel capacity
pub const MAX_LOG_CAPACITY: usize = 1000;

/// Severity / category of an operator log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
    /// Safety gate refusals and interlocks
    Safety,
    /// Digital input transitions
    Input,
    /// Digital output writes
    Output,
}

impl LogLevel {
    pub const ALL: [LogLevel; 7] = [
        LogLevel::Info,
        LogLevel::Success,
        LogLevel::Warning,
        LogLevel::Error,
        LogLevel::Safety,
        LogLevel::Input,
        LogLevel::Output,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Safety => "safety",
            LogLevel::Input => "input",
            LogLevel::Output => "output",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operator log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub t: DateTime<Utc>,
    pub level: LogLevel,
    /// Emitting panel or subsystem (`robot`, `system`, ...)
    pub source: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(
        t: DateTime<Utc>,
        level: LogLevel,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            t,
            level,
            source: source.into(),
            message: message.into(),
        }
    }
}

/// Bounded ring of log entries
#[derive(Debug, Clone)]
pub struct OperationLog {
    source: String,
    capacity: usize,
    entries: VecDeque<LogEntry>,
}

impl OperationLog {
    /// New log for `source`; capacity is clamped to
    /// `MIN_LOG_CAPACITY..=MAX_LOG_CAPACITY`
    pub fn new(source: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.clamp(MIN_LOG_CAPACITY, MAX_LOG_CAPACITY);
        Self {
            source: source.into(),
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append at `now`, dropping the oldest entry when full
    pub fn append(&mut self, level: LogLevel, message: impl Into<String>, now: DateTime<Utc>) {
        let entry = LogEntry::new(now, level, self.source.clone(), message);
        self.push(entry);
    }

    /// Append a fully formed entry (keeps its own source)
    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Whether the newest entry already says `message` at `level` and is
    /// no older than `window` at `now`
    pub fn repeats_last(
        &self,
        level: LogLevel,
        message: &str,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> bool {
        self.last().is_some_and(|e| {
            e.level == level && e.message == message && now - e.t <= window
        })
    }

    /// Empty the ring, leaving a single "log cleared" entry
    pub fn clear(&mut self, now: DateTime<Utc>) {
        self.entries.clear();
        self.append(LogLevel::Info, "Log cleared", now);
    }

    /// Entries oldest first
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    /// Entries whose level is in `levels` and whose message contains
    /// `text` (case-insensitive; empty matches everything)
    pub fn filter(&self, levels: &[LogLevel], text: &str) -> Vec<&LogEntry> {
        let needle = text.trim().to_lowercase();
        self.entries
            .iter()
            .filter(|e| levels.contains(&e.level))
            .filter(|e| needle.is_empty() || e.message.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn count_at(&self, level: LogLevel) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }

    /// Line-delimited text export, ascending by timestamp
    pub fn export_text(&self) -> String {
        export::entries_to_text(self.entries.iter())
    }

    /// CSV export (`timestamp,level,source,message`), ascending by timestamp
    pub fn export_csv(&self) -> String {
        export::entries_to_csv(self.entries.iter())
    }

    /// Export as a downloadable file named `<panel>-<isoDate>.<ext>`
    pub fn export(&self, format: ExportFormat, now: DateTime<Utc>) -> ExportedFile {
        let contents = match format {
            ExportFormat::Text => self.export_text(),
            ExportFormat::Csv => self.export_csv(),
        };
        ExportedFile::new(export_file_name(&self.source, now, format), format, contents)
    }
}
