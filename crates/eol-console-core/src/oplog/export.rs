//! Text and CSV exports
//!
//! Exports are returned as [`ExportedFile`] values; triggering the actual
//! download is the host's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::LogEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Text,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Text => "log",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ExportFormat::Text => "text/plain",
            ExportFormat::Csv => "text/csv",
        }
    }
}

/// A downloadable artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedFile {
    pub file_name: String,
    pub mime: String,
    pub contents: String,
}

impl ExportedFile {
    pub fn new(file_name: String, format: ExportFormat, contents: String) -> Self {
        Self {
            file_name,
            mime: format.mime().to_string(),
            contents,
        }
    }
}

/// `<panel>-<isoDate>.<ext>`
pub fn export_file_name(panel: &str, now: DateTime<Utc>, format: ExportFormat) -> String {
    format!("{}-{}.{}", panel, now.format("%Y-%m-%d"), format.extension())
}

fn sorted<'a>(entries: impl Iterator<Item = &'a LogEntry>) -> Vec<&'a LogEntry> {
    let mut entries: Vec<&LogEntry> = entries.collect();
    // Stable: entries sharing a timestamp keep insertion order
    entries.sort_by_key(|e| e.t);
    entries
}

pub(crate) fn entries_to_text<'a>(entries: impl Iterator<Item = &'a LogEntry>) -> String {
    let mut out = String::new();
    for e in sorted(entries) {
        out.push_str(&format!(
            "[{}] [{}] {}: {}\n",
            e.t.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            e.level.as_str().to_uppercase(),
            e.source,
            e.message
        ));
    }
    out
}

pub(crate) fn entries_to_csv<'a>(entries: impl Iterator<Item = &'a LogEntry>) -> String {
    let mut out = String::from("timestamp,level,source,message\n");
    for e in sorted(entries) {
        out.push_str(&format!(
            "{},{},{},{}\n",
            e.t.to_rfc3339(),
            e.level,
            csv_field(&e.source),
            csv_field(&e.message)
        ));
    }
    out
}

/// Quote a CSV field when it contains a separator, quote or newline
pub(crate) fn csv_field(value: &str) -> String {
    if value.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
