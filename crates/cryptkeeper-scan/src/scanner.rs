//! JWalk-based directory scanner.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use globset::{Glob, GlobSet, GlobSetBuilder};
use jwalk::{DirEntry, Parallelism, WalkDir};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use cryptkeeper_core::{
    FileRecord, GuardVerdict, PathGuard, ScanConfig, ScanError, ScanOutcome, ScanStats,
    ScanWarning, WarningKind,
};

use crate::progress::{ProgressTracker, ScanPhase, ScanProgress};
use crate::visited::VisitedDirs;

/// Files between two progress broadcasts.
const PROGRESS_INTERVAL: u64 = 256;

type Children = Vec<Result<DirEntry<((), ())>, jwalk::Error>>;

/// Scanner using jwalk for traversal, bounded by a file cap.
///
/// Every directory is checked against the [`PathGuard`] before it is
/// descended into, so a symlink into forbidden territory is never followed.
pub struct JwalkScanner {
    guard: Arc<PathGuard>,
    progress_tx: broadcast::Sender<ScanProgress>,
}

impl JwalkScanner {
    /// Create a new scanner with the platform path policy.
    pub fn new() -> Self {
        Self::with_guard(Arc::new(PathGuard::system()))
    }

    /// Create a scanner enforcing a specific path policy.
    pub fn with_guard(guard: Arc<PathGuard>) -> Self {
        let (progress_tx, _) = broadcast::channel(100);
        Self { guard, progress_tx }
    }

    /// Subscribe to scan progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }

    /// Perform a scan of the given path to completion or cap.
    pub fn scan(&self, config: &ScanConfig) -> Result<ScanOutcome, ScanError> {
        self.scan_with_cancel(config, &CancellationToken::new())
    }

    /// Perform a scan that stops early when `cancel` fires.
    ///
    /// Cancellation is checked at directory boundaries. A cancelled scan is
    /// not an error: the records collected so far are returned with
    /// `cancelled` set.
    pub fn scan_with_cancel(
        &self,
        config: &ScanConfig,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome, ScanError> {
        let root = config
            .root
            .canonicalize()
            .map_err(|e| ScanError::io(&config.root, e))?;

        let guard_warning = match self.guard.check(&root) {
            GuardVerdict::Forbidden(reason) => {
                return Err(ScanError::Forbidden { path: root, reason });
            }
            GuardVerdict::AllowedWithWarning(reason) => Some(reason),
            GuardVerdict::Allowed => None,
        };

        if !root.is_dir() {
            return Err(ScanError::NotADirectory { path: root });
        }

        let ignore = Arc::new(build_ignore_set(&config.ignore_patterns)?);
        let visited = Arc::new(VisitedDirs::new());
        visited.visit(&root);
        let warnings = Arc::new(Mutex::new(Vec::new()));

        let walker = self.walker(config, &root, ignore, visited, warnings.clone(), cancel.clone());

        let mut tracker = ProgressTracker::new();
        let mut stats = ScanStats::new();
        let mut records = Vec::new();
        let mut limit_reached = false;
        let mut cancelled = false;

        for entry_result in walker {
            let entry = match entry_result {
                Ok(e) => e,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                    warnings
                        .lock()
                        .push(walk_warning(path, &err, WarningKind::ReadError));
                    continue;
                }
            };

            let file_type = entry.file_type();

            if file_type.is_dir() {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                let path = entry.path();
                if let Some(err) = entry.read_children_error.as_ref() {
                    warnings
                        .lock()
                        .push(walk_warning(&path, err, WarningKind::ReadError));
                }
                stats.record_dir();
                tracker.record_dir(path);
                continue;
            }

            if !file_type.is_file() {
                continue;
            }

            if records.len() >= config.cap {
                limit_reached = true;
                break;
            }

            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    warnings
                        .lock()
                        .push(walk_warning(&path, &err, WarningKind::MetadataError));
                    continue;
                }
            };

            let record = FileRecord::new(
                path,
                metadata.len(),
                metadata.modified().unwrap_or(UNIX_EPOCH),
            );
            stats.record_file(&record);
            tracker.record_file(record.size);
            records.push(record);

            if tracker.files_scanned() % PROGRESS_INTERVAL == 0 {
                let count = warnings.lock().len() as u64;
                let _ = self
                    .progress_tx
                    .send(tracker.snapshot(ScanPhase::Walking, count));
            }
        }

        let phase = if cancelled {
            ScanPhase::Cancelled
        } else if limit_reached {
            ScanPhase::LimitReached
        } else {
            ScanPhase::Complete
        };

        let warnings = std::mem::take(&mut *warnings.lock());
        let _ = self
            .progress_tx
            .send(tracker.snapshot(phase, warnings.len() as u64));

        tracing::debug!(
            root = %root.display(),
            files = records.len(),
            limit_reached,
            cancelled,
            "scan finished"
        );

        Ok(ScanOutcome {
            root,
            records,
            limit_reached,
            cancelled,
            stats,
            warnings,
            guard_warning,
            duration: tracker.elapsed(),
        })
    }

    /// Configure the jwalk traversal, pruning children before descent.
    fn walker(
        &self,
        config: &ScanConfig,
        root: &Path,
        ignore: Arc<GlobSet>,
        visited: Arc<VisitedDirs>,
        warnings: Arc<Mutex<Vec<ScanWarning>>>,
        cancel: CancellationToken,
    ) -> WalkDir {
        let parallelism = match config.threads {
            0 => Parallelism::RayonDefaultPool {
                busy_timeout: std::time::Duration::from_millis(100),
            },
            n => Parallelism::RayonNewPool(n),
        };

        let guard = self.guard.clone();

        WalkDir::new(root)
            .parallelism(parallelism)
            .sort(true)
            .skip_hidden(!config.include_hidden)
            .follow_links(config.follow_symlinks)
            .min_depth(0)
            .max_depth(config.max_depth.map(|d| d as usize).unwrap_or(usize::MAX))
            .process_read_dir(
                move |depth: Option<usize>, _dir: &Path, _state: &mut (), children: &mut Children| {
                    // The root itself arrives with no depth; it was checked already.
                    if depth.is_none() {
                        return;
                    }
                    if cancel.is_cancelled() {
                        children.clear();
                        return;
                    }
                    children.retain(|child| match child {
                        Ok(entry) => {
                            keep_entry(entry, &guard, &ignore, &visited, &warnings)
                        }
                        Err(_) => true,
                    });
                },
            )
    }
}

impl Default for JwalkScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn keep_entry(
    entry: &DirEntry<((), ())>,
    guard: &PathGuard,
    ignore: &GlobSet,
    visited: &VisitedDirs,
    warnings: &Mutex<Vec<ScanWarning>>,
) -> bool {
    if !ignore.is_empty() && ignore.is_match(Path::new(&entry.file_name)) {
        return false;
    }

    if !entry.file_type().is_dir() {
        return true;
    }

    let path = entry.path();
    if let GuardVerdict::Forbidden(reason) = guard.check(&path) {
        tracing::debug!(path = %path.display(), %reason, "not descending");
        warnings.lock().push(ScanWarning::forbidden(&path, &reason));
        return false;
    }

    if !visited.visit(&path) {
        warnings.lock().push(ScanWarning::symlink_cycle(&path));
        return false;
    }

    true
}

fn build_ignore_set(patterns: &[String]) -> Result<GlobSet, ScanError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| ScanError::InvalidConfig {
            message: format!("bad ignore pattern {pattern:?}: {e}"),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| ScanError::InvalidConfig {
        message: e.to_string(),
    })
}

fn walk_warning(path: impl Into<PathBuf>, err: &jwalk::Error, kind: WarningKind) -> ScanWarning {
    match err.io_error() {
        Some(io) => ScanWarning::io(path, io, kind),
        None => ScanWarning::new(path, err.to_string(), kind),
    }
}
