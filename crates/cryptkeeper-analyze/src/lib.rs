//! Duplicate detection and classification for cryptkeeper.
//!
//! - **Duplicate detection**: size buckets, head/tail quick compare, then a
//!   streaming BLAKE3 digest. The oldest member of a group is its original.
//! - **Classification**: Demon (large), Zombie (non-original duplicate) and
//!   Ghost (stale) tags, suppressed for excluded paths.
//!
//! ```rust,ignore
//! use cryptkeeper_analyze::{Classifier, DuplicateDetector};
//! use cryptkeeper_core::NoExclusions;
//! use cryptkeeper_scan::{JwalkScanner, ScanConfig};
//!
//! let outcome = JwalkScanner::new().scan(&ScanConfig::new("/path/to/scan")).unwrap();
//! let groups = DuplicateDetector::new().detect(&outcome.records);
//! let classified = Classifier::new().classify(&outcome.records, &NoExclusions, &groups);
//!
//! for file in classified.iter().filter(|f| f.is_tagged()) {
//!     println!("{} {}", file.classifications, file.path().display());
//! }
//! ```

mod classify;
mod duplicates;

use thiserror::Error;

pub use classify::{
    ClassificationSummary, Classifier, ClassifyConfig, ClassifyConfigBuilder, format_age,
};
pub use duplicates::{
    DuplicateConfig, DuplicateConfigBuilder, DuplicateDetector, DuplicateGroup, content_hash,
};

pub use cryptkeeper_core::{
    Classification, ClassificationSet, ClassifiedFile, ContentHash, Exclusions, FileRecord,
    NoExclusions,
};

/// Errors from analysis passes.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("analysis cancelled")]
    Cancelled,
}
