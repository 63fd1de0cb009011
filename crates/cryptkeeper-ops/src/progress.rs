//! Progress reporting types for purges.

use std::path::PathBuf;

use crate::error::OperationError;
use crate::undo::{PurgeReport, SessionId};

/// Progress information for an ongoing purge.
#[derive(Debug, Clone)]
pub struct PurgeProgress {
    pub session_id: SessionId,
    /// Number of files moved so far.
    pub files_completed: usize,
    /// Number of files that could not be moved.
    pub files_failed: usize,
    /// Total number of files requested.
    pub files_total: usize,
    /// Number of bytes moved so far.
    pub bytes_processed: u64,
    /// Total bytes to move (0 if the requests carried no sizes).
    pub bytes_total: u64,
    /// The file currently being moved.
    pub current_file: Option<PathBuf>,
}

impl PurgeProgress {
    pub fn new(session_id: SessionId, files_total: usize, bytes_total: u64) -> Self {
        Self {
            session_id,
            files_completed: 0,
            files_failed: 0,
            files_total,
            bytes_processed: 0,
            bytes_total,
            current_file: None,
        }
    }

    /// Get the progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        let done = self.files_completed + self.files_failed;
        if self.files_total > 0 {
            (done as f64 / self.files_total as f64) * 100.0
        } else {
            100.0
        }
    }

    pub fn set_current_file(&mut self, path: Option<PathBuf>) {
        self.current_file = path;
    }

    pub fn complete_file(&mut self, bytes: u64) {
        self.files_completed += 1;
        self.bytes_processed += bytes;
    }

    pub fn add_error(&mut self) {
        self.files_failed += 1;
    }
}

/// Messages sent while a purge runs in the background.
#[derive(Debug, Clone)]
pub enum PurgeEvent {
    /// About to move `current_file`, or finished when it is `None`.
    Progress(PurgeProgress),
    /// One file could not be moved; the purge carries on.
    Failed(OperationError),
    /// The purge finished.
    Complete(PurgeReport),
}
