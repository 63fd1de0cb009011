//! cryptkeeper - find stale, duplicate and oversized files and move them
//! into an audited, reversible graveyard.
//!
//! [`Keeper`] ties the workspace crates together for one data directory:
//! scanning ([`cryptkeeper_scan`]), classification ([`cryptkeeper_analyze`])
//! and custody ([`cryptkeeper_ops`]).
//!
//! ```rust,no_run
//! use cryptkeeper::{BanishRequest, Keeper, KeeperConfig};
//!
//! let keeper = Keeper::open(KeeperConfig::default())?;
//! let outcome = keeper.scan("/home/me/Downloads")?;
//! let requests: Vec<BanishRequest> = keeper
//!     .classify(&outcome.records)
//!     .iter()
//!     .filter(|f| f.is_tagged())
//!     .map(BanishRequest::from)
//!     .collect();
//! let report = keeper.purge(&requests);
//! keeper.undo_session(report.session_id)?;
//! # Ok::<(), cryptkeeper::KeeperError>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use cryptkeeper_analyze::{Classifier, ClassifyConfig, DuplicateDetector, DuplicateGroup};
use cryptkeeper_scan::{ScanCoordinator, ScanHandle};

pub use cryptkeeper_analyze::{ClassificationSummary, format_age};
pub use cryptkeeper_core::{
    Classification, ClassificationSet, ClassifiedFile, ConfigError, FileRecord, GuardVerdict,
    KeeperConfig, PathGuard, ScanConfig, ScanError, ScanOutcome,
};
pub use cryptkeeper_ops::{
    BanishReceipt, BanishRequest, CustodyError, GraveyardLog, LogAction, LogEntry, LogFilter,
    Orphan, PurgeEvent, PurgeReport, ReconcileReport, Restored, SessionId, SessionUndoReport,
    StoreError, UndoError, UndoId, WhitelistStore,
};
pub use cryptkeeper_scan::{ScanPhase, ScanProgress};

use cryptkeeper_ops::{QuarantineStore, UndoCoordinator};

/// Errors surfaced by [`Keeper`].
#[derive(Debug, Error)]
pub enum KeeperError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Custody(#[from] CustodyError),

    #[error(transparent)]
    Undo(#[from] UndoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Cannot prepare data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No live Banish entry for this graveyard path.
    #[error("Not in the graveyard log: {path}")]
    NotInGraveyard { path: PathBuf },
}

/// Every store for one data directory.
pub struct Keeper {
    config: KeeperConfig,
    guard: Arc<PathGuard>,
    scans: ScanCoordinator,
    whitelist: WhitelistStore,
    undo: Arc<UndoCoordinator>,
    startup_report: ReconcileReport,
}

impl Keeper {
    /// Open the data directory described by `config` under the platform
    /// path policy.
    pub fn open(config: KeeperConfig) -> Result<Self, KeeperError> {
        Self::open_with_guard(config, PathGuard::system())
    }

    /// Open with `guard` as the base policy. The configured deny roots,
    /// deny patterns and safe roots are added to it, and the data directory
    /// is always denied.
    pub fn open_with_guard(config: KeeperConfig, guard: PathGuard) -> Result<Self, KeeperError> {
        config.validate()?;

        let data_dir = &config.data_dir;
        fs::create_dir_all(data_dir).map_err(|source| KeeperError::DataDir {
            path: data_dir.clone(),
            source,
        })?;
        let data_dir = data_dir
            .canonicalize()
            .map_err(|source| KeeperError::DataDir {
                path: data_dir.clone(),
                source,
            })?;

        let guard = Arc::new(build_guard(guard, &config, &data_dir)?);
        let log = Arc::new(GraveyardLog::open(config.log_path())?);
        let whitelist = WhitelistStore::open(config.whitelist_path())?;
        let store = Arc::new(QuarantineStore::open(
            config.graveyard_root(),
            guard.clone(),
            log,
        )?);

        let startup_report = cryptkeeper_ops::reconcile(store.root(), store.log());
        if !startup_report.is_consistent() {
            tracing::warn!(
                orphans = startup_report.orphans.len(),
                "graveyard and log disagree; run reconcile for details"
            );
        }

        tracing::debug!(data_dir = %data_dir.display(), "keeper opened");

        let undo = Arc::new(UndoCoordinator::with_window(
            store,
            config.purge_undo_window(),
        ));

        Ok(Self {
            scans: ScanCoordinator::new(guard.clone()),
            config,
            guard,
            whitelist,
            undo,
            startup_report,
        })
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    pub fn graveyard_root(&self) -> &Path {
        self.undo.store().root()
    }

    /// Policy verdict for scanning `root`.
    pub fn check_root(&self, root: &Path) -> GuardVerdict {
        self.guard.check(root)
    }

    /// Scan settings for `root` derived from the keeper configuration.
    pub fn scan_config(&self, root: impl Into<PathBuf>) -> ScanConfig {
        let mut config = ScanConfig::new(root).with_cap(self.config.scan_cap);
        config.ignore_patterns = self.config.ignore_patterns.clone();
        config
    }

    /// Start a background scan of `root`. Must be called from within a
    /// Tokio runtime.
    pub fn start_scan(&self, root: impl Into<PathBuf>) -> Result<ScanHandle, KeeperError> {
        Ok(self.scans.start(self.scan_config(root))?)
    }

    /// Scan `root` on the current thread. Fails with
    /// [`ScanError::AlreadyScanning`] while a background scan of the same
    /// root is running.
    pub fn scan(&self, root: impl Into<PathBuf>) -> Result<ScanOutcome, KeeperError> {
        Ok(self.scans.scan_blocking(&self.scan_config(root))?)
    }

    /// Tag `records`, treating whitelisted paths as untouchable.
    pub fn classify(&self, records: &[FileRecord]) -> Vec<ClassifiedFile> {
        self.classify_with_groups(records).0
    }

    /// [`classify`](Self::classify), also returning the duplicate groups the
    /// Zombie tags came from.
    pub fn classify_with_groups(
        &self,
        records: &[FileRecord],
    ) -> (Vec<ClassifiedFile>, Vec<DuplicateGroup>) {
        let groups = DuplicateDetector::new().detect(records);
        let classifier = Classifier::with_config(ClassifyConfig {
            demon_threshold: self.config.demon_threshold,
            stale_threshold: self.config.stale_threshold(),
            ..ClassifyConfig::default()
        });
        let whitelist = self.whitelist.snapshot();
        let classified = classifier.classify(records, &whitelist, &groups);
        (classified, groups)
    }

    /// Move one file into the graveyard.
    pub fn banish(&self, request: &BanishRequest) -> Result<BanishReceipt, CustodyError> {
        self.undo.banish(request)
    }

    /// Move a graveyard file back to `original_path`.
    pub fn restore(
        &self,
        graveyard_path: &Path,
        original_path: &Path,
    ) -> Result<Restored, CustodyError> {
        self.undo.store().restore(graveyard_path, original_path)
    }

    pub fn undo(&self, undo_id: UndoId) -> Result<Restored, UndoError> {
        self.undo.undo(undo_id)
    }

    /// Banish every request, continuing past failures.
    pub fn purge(&self, requests: &[BanishRequest]) -> PurgeReport {
        self.undo.purge(requests)
    }

    /// [`purge`](Self::purge) on the blocking pool with progress events.
    /// Must be called from within a Tokio runtime.
    pub fn start_purge(&self, requests: Vec<BanishRequest>) -> mpsc::Receiver<PurgeEvent> {
        cryptkeeper_ops::start_purge(self.undo.clone(), requests)
    }

    pub fn undo_session(&self, session_id: SessionId) -> Result<SessionUndoReport, UndoError> {
        self.undo.undo_session(session_id)
    }

    /// Whitelist `path` so it is never classified again, and log it.
    /// Returns `false` if it was already whitelisted.
    ///
    /// The path is stored in the form the scanner reports, with its parent
    /// directory resolved.
    pub fn resurrect(&self, path: impl AsRef<Path>) -> Result<bool, StoreError> {
        let path = scan_form(path.as_ref());
        if !self.whitelist.add(&path)? {
            return Ok(false);
        }
        self.log().append(LogEntry::resurrect(&path))?;
        Ok(true)
    }

    /// Drop `path` from the whitelist. Returns `false` if it was not there.
    pub fn unwhitelist(&self, path: impl AsRef<Path>) -> Result<bool, StoreError> {
        let path = path.as_ref();
        if self.whitelist.remove(&scan_form(path))? {
            return Ok(true);
        }
        self.whitelist.remove(path)
    }

    /// Restore a graveyard file to where it came from, then whitelist it.
    pub fn resurrect_from_graveyard(&self, graveyard_path: &Path) -> Result<Restored, KeeperError> {
        let entry = self
            .log()
            .banished_at(graveyard_path)
            .ok_or_else(|| KeeperError::NotInGraveyard {
                path: graveyard_path.to_path_buf(),
            })?;
        let original = entry.original_path.unwrap_or(entry.file_path);

        let restored = self.restore(graveyard_path, &original)?;
        self.resurrect(&restored.original_path)?;
        Ok(restored)
    }

    pub fn whitelist(&self) -> &WhitelistStore {
        &self.whitelist
    }

    pub fn log(&self) -> &GraveyardLog {
        self.undo.store().log()
    }

    /// Banish entries whose file should still be in the graveyard.
    pub fn graveyard(&self) -> Vec<LogEntry> {
        self.log().current_graveyard()
    }

    /// Compare the graveyard directory with the log now.
    pub fn reconcile(&self) -> ReconcileReport {
        cryptkeeper_ops::reconcile(self.graveyard_root(), self.log())
    }

    /// What the reconciliation at open time found.
    pub fn startup_report(&self) -> &ReconcileReport {
        &self.startup_report
    }
}

/// `path` with its parent directory canonicalized and the final component
/// kept as is, matching the paths a scan produces. Paths whose parent does
/// not exist are returned unchanged.
pub fn scan_form(path: &Path) -> PathBuf {
    let resolved = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            parent.canonicalize().map(|dir| dir.join(name))
        }
        _ => path.canonicalize(),
    };
    resolved.unwrap_or_else(|_| path.to_path_buf())
}

fn build_guard(
    base: PathGuard,
    config: &KeeperConfig,
    data_dir: &Path,
) -> Result<PathGuard, ConfigError> {
    let mut guard = base.deny_root(data_dir);
    for root in &config.deny_roots {
        guard = guard.deny_root(root);
    }
    for pattern in &config.deny_patterns {
        guard = guard.deny_pattern(pattern)?;
    }
    for root in &config.safe_roots {
        guard = guard.safe_root(root);
    }
    Ok(guard)
}
