//! Operator preferences
//!
//! Small per-station settings that survive a restart: digital I/O channel
//! labels and the level/text filter of each panel log. Nothing here is
//! hardware state.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::oplog::LogLevel;
use crate::panels::PanelId;

/// File name inside the preference directory
pub const PREFERENCES_FILE: &str = "preferences.json";

#[derive(Error, Debug)]
pub enum PreferenceError {
    #[error("Preference storage error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid preference document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Could not find a data directory for preferences")]
    NoDataDir,
}

/// Level and text filter of one panel log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFilter {
    pub levels: Vec<LogLevel>,
    pub text: String,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            levels: LogLevel::ALL.to_vec(),
            text: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorPreferences {
    /// Custom input labels by channel
    pub input_labels: BTreeMap<usize, String>,
    /// Custom output labels by channel
    pub output_labels: BTreeMap<usize, String>,
    pub log_filters: BTreeMap<PanelId, LogFilter>,
}

impl OperatorPreferences {
    /// Filter for `panel`, everything shown when none was saved
    pub fn log_filter(&self, panel: PanelId) -> LogFilter {
        self.log_filters.get(&panel).cloned().unwrap_or_default()
    }

    pub fn set_log_filter(&mut self, panel: PanelId, filter: LogFilter) {
        if filter == LogFilter::default() {
            self.log_filters.remove(&panel);
        } else {
            self.log_filters.insert(panel, filter);
        }
    }
}

/// Where preferences are kept
pub trait PreferenceStore {
    /// `Ok(None)` when nothing was saved yet
    fn load(&self) -> Result<Option<OperatorPreferences>, PreferenceError>;

    fn save(&self, preferences: &OperatorPreferences) -> Result<(), PreferenceError>;
}

/// Process-local store, used by tests and hosts without a disk
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    saved: RefCell<Option<String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self) -> Result<Option<OperatorPreferences>, PreferenceError> {
        match self.saved.borrow().as_deref() {
            Some(text) => Ok(Some(serde_json::from_str(text)?)),
            None => Ok(None),
        }
    }

    fn save(&self, preferences: &OperatorPreferences) -> Result<(), PreferenceError> {
        let text = serde_json::to_string(preferences)?;
        *self.saved.borrow_mut() = Some(text);
        Ok(())
    }
}

/// JSON document on disk
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    path: PathBuf,
}

impl FilePreferenceStore {
    /// Default preference directory (in app data)
    pub fn default_dir() -> Result<PathBuf, PreferenceError> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or(PreferenceError::NoDataDir)?;
        Ok(base.join("eol-console"))
    }

    /// Store under the default directory
    pub fn open_default() -> Result<Self, PreferenceError> {
        Ok(Self::in_dir(&Self::default_dir()?))
    }

    /// Store keeping [`PREFERENCES_FILE`] in `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(PREFERENCES_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn load(&self) -> Result<Option<OperatorPreferences>, PreferenceError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, preferences: &OperatorPreferences) -> Result<(), PreferenceError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(preferences)?;
        fs::write(&self.path, content)?;
        tracing::debug!(path = %self.path.display(), "saved operator preferences");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn sample() -> OperatorPreferences {
        let mut prefs = OperatorPreferences::default();
        prefs.input_labels.insert(0, "Door Switch".into());
        prefs.output_labels.insert(12, "Clamp".into());
        prefs.set_log_filter(
            PanelId::Robot,
            LogFilter {
                levels: vec![LogLevel::Error, LogLevel::Safety],
                text: "servo".into(),
            },
        );
        prefs
    }

    #[test]
    fn test_memory_store_starts_empty() {
        let store = MemoryPreferenceStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), Some(sample()));
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempdir().unwrap();
        let store = FilePreferenceStore::in_dir(&dir.path().join("nested"));
        assert!(store.load().unwrap().is_none());
        store.save(&sample()).unwrap();

        let reopened = FilePreferenceStore::in_dir(&dir.path().join("nested"));
        let prefs = reopened.load().unwrap().unwrap();
        assert_eq!(prefs.input_labels.get(&0).map(String::as_str), Some("Door Switch"));
        assert_eq!(prefs.log_filter(PanelId::Robot).text, "servo");
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let store = FilePreferenceStore::in_dir(dir.path());
        fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load(), Err(PreferenceError::Parse(_))));
    }

    #[test]
    fn test_default_filter_is_not_stored() {
        let mut prefs = sample();
        prefs.set_log_filter(PanelId::Robot, LogFilter::default());
        assert!(prefs.log_filters.is_empty());
        assert_eq!(prefs.log_filter(PanelId::Power).levels.len(), LogLevel::ALL.len());
    }
}
