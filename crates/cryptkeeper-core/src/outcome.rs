//! Scan results and statistics.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::ScanWarning;
use crate::record::FileRecord;

/// Summary statistics for a scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStats {
    /// Total size in bytes of collected files.
    pub total_size: u64,
    /// Number of collected files.
    pub total_files: u64,
    /// Number of directories descended into.
    pub total_dirs: u64,
    /// Largest file (path, size).
    pub largest_file: Option<(PathBuf, u64)>,
    /// Oldest file (path, time).
    pub oldest_file: Option<(PathBuf, SystemTime)>,
}

impl ScanStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a collected file.
    pub fn record_file(&mut self, record: &FileRecord) {
        self.total_files += 1;
        self.total_size += record.size;

        if self.largest_file.as_ref().is_none_or(|(_, s)| record.size > *s) {
            self.largest_file = Some((record.path.clone(), record.size));
        }

        if self
            .oldest_file
            .as_ref()
            .is_none_or(|(_, t)| record.modified < *t)
        {
            self.oldest_file = Some((record.path.clone(), record.modified));
        }
    }

    /// Record a directory.
    pub fn record_dir(&mut self) {
        self.total_dirs += 1;
    }
}

/// Everything a scan produced. Partial results are never discarded: a scan
/// that hit its cap or was cancelled still carries every record collected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutcome {
    /// Canonical root that was scanned.
    pub root: PathBuf,
    /// Regular files found, in traversal order.
    pub records: Vec<FileRecord>,
    /// The file cap stopped the walk before it finished.
    pub limit_reached: bool,
    /// The walk was cancelled before it finished.
    pub cancelled: bool,
    /// Summary statistics.
    pub stats: ScanStats,
    /// Warnings encountered during the scan.
    pub warnings: Vec<ScanWarning>,
    /// Reason the root needs user confirmation, if any.
    pub guard_warning: Option<String>,
    /// Duration of the scan.
    pub duration: Duration,
}

impl ScanOutcome {
    /// Whether the walk covered the whole tree.
    pub fn is_complete(&self) -> bool {
        !self.limit_reached && !self.cancelled
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
