//! Scan progress reporting.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use strum::Display;

/// What the scanner is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ScanPhase {
    #[strum(to_string = "Walking directories")]
    Walking,
    #[strum(to_string = "Stopped at file limit")]
    LimitReached,
    #[strum(to_string = "Cancelled")]
    Cancelled,
    #[strum(to_string = "Scan complete")]
    Complete,
}

/// A point-in-time view of a running scan.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    /// Current phase.
    pub phase: ScanPhase,
    /// Number of files collected so far. Never decreases within a scan.
    pub files_scanned: u64,
    /// Number of directories descended into so far.
    pub dirs_scanned: u64,
    /// Total bytes of collected files.
    pub bytes_scanned: u64,
    /// Directory most recently entered.
    pub current_path: PathBuf,
    /// Number of warnings encountered.
    pub warnings_count: u64,
    /// Wall time since the walk began.
    pub elapsed: Duration,
}

impl ScanProgress {
    /// A snapshot taken before anything was walked.
    pub fn new() -> Self {
        Self {
            phase: ScanPhase::Walking,
            files_scanned: 0,
            dirs_scanned: 0,
            bytes_scanned: 0,
            current_path: PathBuf::new(),
            warnings_count: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Human-readable one-line status.
    pub fn describe(&self) -> String {
        format!("{}: {} files", self.phase, self.files_scanned)
    }

    /// Whether this is the last snapshot a scan will send.
    pub fn is_final(&self) -> bool {
        self.phase != ScanPhase::Walking
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates counters on the walking thread and stamps snapshots with the
/// time since the walk began.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    started: Instant,
    running: ScanProgress,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            running: ScanProgress::new(),
        }
    }

    pub fn record_file(&mut self, size: u64) {
        self.running.files_scanned += 1;
        self.running.bytes_scanned += size;
    }

    pub fn record_dir(&mut self, path: PathBuf) {
        self.running.dirs_scanned += 1;
        self.running.current_path = path;
    }

    pub fn files_scanned(&self) -> u64 {
        self.running.files_scanned
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self, phase: ScanPhase, warnings_count: u64) -> ScanProgress {
        ScanProgress {
            phase,
            warnings_count,
            elapsed: self.elapsed(),
            ..self.running.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_snapshot() {
        let mut tracker = ProgressTracker::new();
        tracker.record_dir(PathBuf::from("/a"));
        tracker.record_file(10);
        tracker.record_file(5);

        let snap = tracker.snapshot(ScanPhase::Walking, 1);
        assert_eq!(snap.files_scanned, 2);
        assert_eq!(snap.bytes_scanned, 15);
        assert_eq!(snap.dirs_scanned, 1);
        assert_eq!(snap.current_path, PathBuf::from("/a"));
        assert_eq!(snap.describe(), "Walking directories: 2 files");
        assert!(!snap.is_final());
        assert!(tracker.snapshot(ScanPhase::LimitReached, 1).is_final());
    }
}
