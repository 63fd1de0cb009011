//! Append-only JSON Lines record of every custody action.
//!
//! Each line is one self-contained [`LogEntry`]. A line is assembled in
//! memory and written with a single `write_all` on an `O_APPEND` handle,
//! then synced, so a crash leaves at worst a truncated final line. That line
//! is dropped (and the original file kept aside) the next time the log is
//! opened.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use cryptkeeper_core::ClassificationSet;

use crate::durable::{preserve_corrupt, write_atomic};
use crate::error::StoreError;
use crate::undo::SessionId;

/// What happened to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogAction {
    /// Moved into the graveyard.
    Banish,
    /// Moved back out of the graveyard.
    Restore,
    /// Added to the whitelist.
    Resurrect,
}

/// One line of the graveyard log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: LogAction,
    /// The path the action is about, from the user's point of view.
    pub file_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graveyard_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifications: Option<ClassificationSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Purge session that produced this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionId>,
}

impl LogEntry {
    fn new(action: LogAction, file_path: PathBuf) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            file_path,
            original_path: None,
            graveyard_path: None,
            classifications: None,
            file_size: None,
            session: None,
        }
    }

    pub fn banish(
        original_path: impl Into<PathBuf>,
        graveyard_path: impl Into<PathBuf>,
        classifications: ClassificationSet,
        file_size: u64,
    ) -> Self {
        let original_path = original_path.into();
        Self {
            original_path: Some(original_path.clone()),
            graveyard_path: Some(graveyard_path.into()),
            classifications: (!classifications.is_empty()).then_some(classifications),
            file_size: Some(file_size),
            ..Self::new(LogAction::Banish, original_path)
        }
    }

    pub fn restore(graveyard_path: impl Into<PathBuf>, original_path: impl Into<PathBuf>) -> Self {
        let original_path = original_path.into();
        Self {
            original_path: Some(original_path.clone()),
            graveyard_path: Some(graveyard_path.into()),
            ..Self::new(LogAction::Restore, original_path)
        }
    }

    pub fn resurrect(path: impl Into<PathBuf>) -> Self {
        Self::new(LogAction::Resurrect, path.into())
    }

    pub fn with_session(mut self, session: Option<SessionId>) -> Self {
        self.session = session;
        self
    }
}

/// Selects log entries. Unset fields match everything; time bounds are
/// inclusive.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub action: Option<LogAction>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(mut self, action: LogAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.action.is_none_or(|a| a == entry.action)
            && self.start.is_none_or(|s| entry.timestamp >= s)
            && self.end.is_none_or(|e| entry.timestamp <= e)
    }
}

/// A log entry together with its serialized line.
#[derive(Debug, Clone)]
pub struct EncodedEntry {
    entry: LogEntry,
    line: String,
}

impl EncodedEntry {
    pub fn entry(&self) -> &LogEntry {
        &self.entry
    }
}

struct LogInner {
    file: File,
    entries: Vec<LogEntry>,
}

/// The durable, append-only custody log.
pub struct GraveyardLog {
    path: PathBuf,
    inner: Mutex<LogInner>,
}

impl GraveyardLog {
    /// Open the log at `path`, creating it if missing.
    ///
    /// Lines that do not parse are dropped with a warning; the file as found
    /// is kept next to the log as `*.corrupt` and the log is rewritten with
    /// the entries that did parse.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let entries = match fs::read(&path) {
            Ok(bytes) => load_entries(&path, &bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;

        tracing::debug!(path = %path.display(), entries = entries.len(), "graveyard log opened");

        Ok(Self {
            path,
            inner: Mutex::new(LogInner { file, entries }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append one entry. The entry becomes visible to readers only
    /// after it reached the disk.
    pub fn append(&self, entry: LogEntry) -> Result<(), StoreError> {
        let encoded = self.encode(entry)?;
        self.append_encoded(encoded)
    }

    /// Render `entry` to its log line without writing it.
    ///
    /// Paths that are not valid UTF-8 cannot be represented in JSON, so
    /// callers that must not act without a log entry encode first.
    pub fn encode(&self, entry: LogEntry) -> Result<EncodedEntry, StoreError> {
        let mut line = serde_json::to_string(&entry).map_err(|source| StoreError::Serialize {
            path: self.path.clone(),
            source,
        })?;
        line.push('\n');
        Ok(EncodedEntry { entry, line })
    }

    /// Durably append a line produced by [`encode`](Self::encode).
    pub fn append_encoded(&self, encoded: EncodedEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        write_line(&mut inner.file, encoded.line.as_bytes())
            .map_err(|e| StoreError::io(&self.path, e))?;
        inner.entries.push(encoded.entry);
        Ok(())
    }

    /// Matching entries in append order.
    pub fn query(&self, filter: &LogFilter) -> Vec<LogEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    /// Every entry in append order.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Banish entries whose file should still be in the graveyard.
    pub fn current_graveyard(&self) -> Vec<LogEntry> {
        current_graveyard(&self.inner.lock().entries)
    }

    /// The unmatched Banish entry for `graveyard_path`, if any.
    pub fn banished_at(&self, graveyard_path: &Path) -> Option<LogEntry> {
        self.current_graveyard()
            .into_iter()
            .find(|e| e.graveyard_path.as_deref() == Some(graveyard_path))
    }
}

/// Pair Banish and Restore entries by graveyard path. A Restore cancels the
/// latest Banish to the same path; what remains is in append order.
pub fn current_graveyard(entries: &[LogEntry]) -> Vec<LogEntry> {
    let mut live: IndexMap<&Path, &LogEntry> = IndexMap::new();
    for entry in entries {
        let Some(graveyard_path) = entry.graveyard_path.as_deref() else {
            continue;
        };
        match entry.action {
            LogAction::Banish => {
                live.shift_remove(graveyard_path);
                live.insert(graveyard_path, entry);
            }
            LogAction::Restore => {
                live.shift_remove(graveyard_path);
            }
            LogAction::Resurrect => {}
        }
    }
    live.into_values().cloned().collect()
}

fn write_line(file: &mut File, line: &[u8]) -> io::Result<()> {
    file.write_all(line)?;
    file.sync_data()
}

fn load_entries(path: &Path, bytes: &[u8]) -> Result<Vec<LogEntry>, StoreError> {
    let text = String::from_utf8_lossy(bytes);
    let mut entries = Vec::new();
    let mut bad_lines = 0usize;

    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(err) => {
                bad_lines += 1;
                tracing::warn!(path = %path.display(), line = number + 1, %err, "skipping unreadable log line");
            }
        }
    }

    if bad_lines > 0 {
        let aside = preserve_corrupt(path).map_err(|e| StoreError::io(path, e))?;
        let mut rewritten = String::new();
        for entry in &entries {
            let line = serde_json::to_string(entry).map_err(|source| StoreError::Serialize {
                path: path.to_path_buf(),
                source,
            })?;
            rewritten.push_str(&line);
            rewritten.push('\n');
        }
        write_atomic(path, rewritten.as_bytes()).map_err(|e| StoreError::io(path, e))?;
        tracing::warn!(
            path = %path.display(),
            kept = entries.len(),
            dropped = bad_lines,
            aside = %aside.display(),
            "recovered corrupt graveyard log"
        );
    }

    Ok(entries)
}
