//! Background scans, one per root.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use cryptkeeper_core::{PathGuard, ScanConfig, ScanError, ScanOutcome};

use crate::progress::ScanProgress;
use crate::scanner::JwalkScanner;

/// Runs scans on the blocking pool and refuses to start a second scan of a
/// root that is still being walked.
#[derive(Clone)]
pub struct ScanCoordinator {
    guard: Arc<PathGuard>,
    active: Arc<DashMap<PathBuf, CancellationToken>>,
}

impl ScanCoordinator {
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self {
            guard,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Start scanning `config.root` in the background.
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// [`ScanError::AlreadyScanning`] while another scan of the same
    /// canonical root is in flight.
    pub fn start(&self, config: ScanConfig) -> Result<ScanHandle, ScanError> {
        let slot = self.claim(&config.root)?;
        let root = slot.root.clone();
        let cancel = slot.cancel.clone();

        let scanner = JwalkScanner::with_guard(self.guard.clone());
        let progress = scanner.subscribe();
        let token = cancel.clone();

        let task = tokio::task::spawn_blocking(move || {
            let _slot = slot;
            scanner.scan_with_cancel(&config, &token)
        });

        tracing::debug!(root = %root.display(), "scan started");

        Ok(ScanHandle {
            root,
            cancel,
            progress,
            task,
        })
    }

    /// Scan `config.root` on the calling thread.
    ///
    /// Holds the same per-root slot as [`start`](Self::start), so it fails
    /// with [`ScanError::AlreadyScanning`] while a background scan of that
    /// root runs, and a background scan started meanwhile is refused.
    pub fn scan_blocking(&self, config: &ScanConfig) -> Result<ScanOutcome, ScanError> {
        let slot = self.claim(&config.root)?;
        let scanner = JwalkScanner::with_guard(self.guard.clone());
        scanner.scan_with_cancel(config, &slot.cancel)
    }

    /// Reserve the slot for the canonical form of `root`.
    fn claim(&self, root: &Path) -> Result<ActiveSlot, ScanError> {
        let root = root.canonicalize().map_err(|e| ScanError::io(root, e))?;
        let cancel = CancellationToken::new();

        match self.active.entry(root.clone()) {
            Entry::Occupied(_) => return Err(ScanError::AlreadyScanning { path: root }),
            Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
            }
        }
        Ok(ActiveSlot {
            root,
            cancel,
            active: self.active.clone(),
        })
    }

    /// Whether a scan of `root` is currently running.
    pub fn is_scanning(&self, root: &Path) -> bool {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        self.active.contains_key(&root)
    }

    /// Cancel the running scan of `root`, if any.
    pub fn cancel(&self, root: &Path) -> bool {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        match self.active.get(&root) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Releases the per-root slot when the scan ends, however it ends.
struct ActiveSlot {
    root: PathBuf,
    cancel: CancellationToken,
    active: Arc<DashMap<PathBuf, CancellationToken>>,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.active.remove(&self.root);
    }
}

/// A scan running in the background.
pub struct ScanHandle {
    root: PathBuf,
    cancel: CancellationToken,
    progress: broadcast::Receiver<ScanProgress>,
    task: JoinHandle<Result<ScanOutcome, ScanError>>,
}

impl ScanHandle {
    /// Canonical root being scanned.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ask the scan to stop at the next directory boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this scan when fired.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Progress updates for this scan.
    pub fn progress(&mut self) -> &mut broadcast::Receiver<ScanProgress> {
        &mut self.progress
    }

    /// Wait for the scan to finish.
    pub async fn join(self) -> Result<ScanOutcome, ScanError> {
        self.task.await.map_err(|e| ScanError::Interrupted {
            message: e.to_string(),
        })?
    }
}
