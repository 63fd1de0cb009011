//! Core types and policy for cryptkeeper.
//!
//! This crate provides the data structures shared by the scanner, the
//! classifier and the custody engine: file records, classification tags,
//! scan configuration and results, and the path safety policy.

mod config;
mod error;
mod guard;
mod outcome;
mod record;

pub use config::{
    DEFAULT_DEMON_THRESHOLD, DEFAULT_PURGE_UNDO_WINDOW_SECS, DEFAULT_SCAN_CAP, DEFAULT_STALE_DAYS,
    KeeperConfig, ScanConfig, ScanConfigBuilder,
};
pub use error::{ConfigError, ScanError, ScanWarning, WarningKind};
pub use guard::{GuardVerdict, PathGuard};
pub use outcome::{ScanOutcome, ScanStats};
pub use record::{
    Classification, ClassificationSet, ClassifiedFile, ContentHash, Exclusions, FileRecord,
    NoExclusions,
};
