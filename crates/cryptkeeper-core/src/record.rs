//! File records and classification tags.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// BLAKE3 content hash for duplicate detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the hash as a hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// A regular file found by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: SystemTime,
}

impl FileRecord {
    /// Create a new record.
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: SystemTime) -> Self {
        Self {
            path: path.into(),
            size,
            modified,
        }
    }
}

/// A cleanup tag a policy rule attached to a file.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Classification {
    /// Not modified for longer than the stale threshold.
    Ghost,
    /// Content duplicate of an older original.
    Zombie,
    /// At or above the size threshold.
    Demon,
}

impl Classification {
    fn bit(self) -> u8 {
        match self {
            Self::Ghost => 0b001,
            Self::Zombie => 0b010,
            Self::Demon => 0b100,
        }
    }

    /// Display precedence; lower wins.
    fn precedence(self) -> u8 {
        match self {
            Self::Demon => 0,
            Self::Ghost => 1,
            Self::Zombie => 2,
        }
    }
}

/// Zero to three classification tags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<Classification>", from = "Vec<Classification>")]
pub struct ClassificationSet(u8);

impl ClassificationSet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Add a tag. Returns `true` if it was not already present.
    pub fn insert(&mut self, tag: Classification) -> bool {
        let fresh = !self.contains(tag);
        self.0 |= tag.bit();
        fresh
    }

    /// Check membership.
    pub fn contains(&self, tag: Classification) -> bool {
        self.0 & tag.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Tags in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Classification> + '_ {
        Classification::iter().filter(|t| self.contains(*t))
    }

    /// The tag a presentation layer should lead with: Demon > Ghost > Zombie.
    pub fn primary(&self) -> Option<Classification> {
        self.iter().min_by_key(|t| t.precedence())
    }
}

impl FromIterator<Classification> for ClassificationSet {
    fn from_iter<I: IntoIterator<Item = Classification>>(iter: I) -> Self {
        let mut set = Self::empty();
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}

impl From<Vec<Classification>> for ClassificationSet {
    fn from(tags: Vec<Classification>) -> Self {
        tags.into_iter().collect()
    }
}

impl From<ClassificationSet> for Vec<Classification> {
    fn from(set: ClassificationSet) -> Self {
        set.iter().collect()
    }
}

impl fmt::Debug for ClassificationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for ClassificationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for tag in self.iter() {
            if !first {
                f.write_str("+")?;
            }
            write!(f, "{tag}")?;
            first = false;
        }
        Ok(())
    }
}

/// A scanned file together with the tags the classifier attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedFile {
    #[serde(flatten)]
    pub record: FileRecord,
    pub classifications: ClassificationSet,
}

impl ClassifiedFile {
    pub fn new(record: FileRecord, classifications: ClassificationSet) -> Self {
        Self {
            record,
            classifications,
        }
    }

    pub fn path(&self) -> &Path {
        &self.record.path
    }

    /// Whether any rule matched. An untagged file is either whitelisted or
    /// simply unremarkable; check the whitelist to tell them apart.
    pub fn is_tagged(&self) -> bool {
        !self.classifications.is_empty()
    }
}

/// Paths the classifier must leave untagged.
pub trait Exclusions {
    fn is_excluded(&self, path: &Path) -> bool;
}

impl Exclusions for HashSet<PathBuf> {
    fn is_excluded(&self, path: &Path) -> bool {
        self.contains(path)
    }
}

impl Exclusions for BTreeSet<PathBuf> {
    fn is_excluded(&self, path: &Path) -> bool {
        self.contains(path)
    }
}

/// No exclusions at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExclusions;

impl Exclusions for NoExclusions {
    fn is_excluded(&self, _path: &Path) -> bool {
        false
    }
}
