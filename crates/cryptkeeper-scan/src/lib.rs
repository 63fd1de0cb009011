//! Bounded directory scanning for cryptkeeper.
//!
//! Walks a root in parallel with jwalk and collects up to `cap` regular
//! files. Directories the [`PathGuard`] forbids are pruned before descent,
//! symlink loops are broken by directory identity, and scans can be
//! cancelled at directory boundaries.
//!
//! # Example
//!
//! ```rust,no_run
//! use cryptkeeper_scan::{JwalkScanner, ScanConfig};
//!
//! let config = ScanConfig::new("/path/to/scan").with_cap(500);
//! let scanner = JwalkScanner::new();
//! let outcome = scanner.scan(&config).unwrap();
//!
//! println!("{} files", outcome.records.len());
//! if outcome.limit_reached {
//!     println!("stopped at the file limit");
//! }
//! ```
//!
//! # Background scans
//!
//! [`ScanCoordinator`] runs scans on the blocking pool and hands back a
//! [`ScanHandle`] for progress, cancellation and the final result. At most
//! one scan per root runs at a time.

mod coordinator;
mod progress;
mod scanner;
mod visited;

pub use coordinator::{ScanCoordinator, ScanHandle};
pub use progress::{ScanPhase, ScanProgress};
pub use scanner::JwalkScanner;
pub use visited::VisitedDirs;

pub use cryptkeeper_core::{
    FileRecord, GuardVerdict, PathGuard, ScanConfig, ScanError, ScanOutcome, ScanStats,
    ScanWarning, WarningKind,
};
