//! Policy rules that tag scanned files as Ghost, Zombie or Demon.

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, SystemTime};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use cryptkeeper_core::{
    Classification, ClassificationSet, ClassifiedFile, DEFAULT_DEMON_THRESHOLD,
    DEFAULT_STALE_DAYS, Exclusions, FileRecord,
};

use crate::duplicates::DuplicateGroup;

const DAY: u64 = 24 * 60 * 60;

/// Thresholds for the classification rules.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct ClassifyConfig {
    /// Files at or above this size are Demons.
    #[builder(default = "DEFAULT_DEMON_THRESHOLD")]
    pub demon_threshold: u64,

    /// Files unmodified for at least this long are Ghosts.
    #[builder(default = "Duration::from_secs(DEFAULT_STALE_DAYS * DAY)")]
    pub stale_threshold: Duration,

    /// Reference time for age calculations (default: now).
    #[builder(default = "SystemTime::now()")]
    pub reference_time: SystemTime,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            demon_threshold: DEFAULT_DEMON_THRESHOLD,
            stale_threshold: Duration::from_secs(DEFAULT_STALE_DAYS * DAY),
            reference_time: SystemTime::now(),
        }
    }
}

impl ClassifyConfig {
    /// Create a new config builder.
    pub fn builder() -> ClassifyConfigBuilder {
        ClassifyConfigBuilder::default()
    }
}

/// Applies the classification rules to scan records.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    config: ClassifyConfig,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ClassifyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifyConfig {
        &self.config
    }

    /// Tag every record. Output order matches `records`.
    ///
    /// Excluded paths always come back with an empty set.
    pub fn classify<E>(
        &self,
        records: &[FileRecord],
        exclusions: &E,
        groups: &[DuplicateGroup],
    ) -> Vec<ClassifiedFile>
    where
        E: Exclusions + ?Sized,
    {
        let zombies: HashSet<&Path> = groups
            .iter()
            .flat_map(|g| g.duplicates())
            .map(|r| r.path.as_path())
            .collect();

        records
            .iter()
            .map(|record| {
                let tags = if exclusions.is_excluded(&record.path) {
                    ClassificationSet::empty()
                } else {
                    self.tags_for(record, zombies.contains(record.path.as_path()))
                };
                ClassifiedFile::new(record.clone(), tags)
            })
            .collect()
    }

    fn tags_for(&self, record: &FileRecord, is_zombie: bool) -> ClassificationSet {
        let mut tags = ClassificationSet::empty();

        if record.size >= self.config.demon_threshold {
            tags.insert(Classification::Demon);
        }
        if is_zombie {
            tags.insert(Classification::Zombie);
        } else if self.is_stale(record.modified) {
            tags.insert(Classification::Ghost);
        }

        tags
    }

    /// Modification times in the future are never stale.
    fn is_stale(&self, modified: SystemTime) -> bool {
        self.config
            .reference_time
            .duration_since(modified)
            .is_ok_and(|age| age >= self.config.stale_threshold)
    }
}

/// Per-tag totals for a classification run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationSummary {
    pub ghosts: usize,
    pub zombies: usize,
    pub demons: usize,
    /// Files with at least one tag.
    pub tagged: usize,
    /// Combined size of tagged files. Each file counts once.
    pub reclaimable_bytes: u64,
}

impl ClassificationSummary {
    pub fn from_classified(files: &[ClassifiedFile]) -> Self {
        let mut summary = Self::default();
        for file in files.iter().filter(|f| f.is_tagged()) {
            summary.tagged += 1;
            summary.reclaimable_bytes += file.record.size;
            for tag in file.classifications.iter() {
                match tag {
                    Classification::Ghost => summary.ghosts += 1,
                    Classification::Zombie => summary.zombies += 1,
                    Classification::Demon => summary.demons += 1,
                }
            }
        }
        summary
    }

    pub fn count(&self, tag: Classification) -> usize {
        match tag {
            Classification::Ghost => self.ghosts,
            Classification::Zombie => self.zombies,
            Classification::Demon => self.demons,
        }
    }
}

/// Format a duration as a rough human-readable age.
pub fn format_age(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs} seconds")
    } else if secs < 3600 {
        format!("{} minutes", secs / 60)
    } else if secs < DAY {
        format!("{} hours", secs / 3600)
    } else if secs < 30 * DAY {
        format!("{} days", secs / DAY)
    } else if secs < 365 * DAY {
        format!("{} months", secs / (30 * DAY))
    } else {
        format!("{:.1} years", secs as f64 / (365 * DAY) as f64)
    }
}
