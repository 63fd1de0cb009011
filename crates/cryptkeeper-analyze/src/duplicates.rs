//! Duplicate file detection using content hashing.
//!
//! Candidates are narrowed in three passes so that most files are never read:
//! 1. Group records by size (no I/O)
//! 2. Hash the first and last 4 KiB of each size-matched file
//! 3. Stream a full BLAKE3 digest for files whose partial hashes agree
//!
//! Only files whose full digests match end up in a group.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use blake3::Hasher;
use derive_builder::Builder;
use itertools::Itertools;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use cryptkeeper_core::{ContentHash, FileRecord};

use crate::AnalyzeError;

/// Read buffer for full-content digests.
const HASH_CHUNK: usize = 64 * 1024;

/// Configuration for duplicate detection.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct DuplicateConfig {
    /// Minimum file size to consider. Empty files are never duplicates.
    #[builder(default = "1")]
    pub min_size: u64,

    /// Maximum file size to consider.
    #[builder(default = "u64::MAX")]
    pub max_size: u64,

    /// Compare head and tail bytes before reading whole files.
    #[builder(default = "true")]
    pub quick_compare: bool,

    /// Number of bytes for partial hash from start of file.
    #[builder(default = "4096")]
    pub partial_hash_head: usize,

    /// Number of bytes for partial hash from end of file.
    #[builder(default = "4096")]
    pub partial_hash_tail: usize,
}

impl DuplicateConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        let min = self.min_size.unwrap_or(1);
        let max = self.max_size.unwrap_or(u64::MAX);
        if min == 0 {
            return Err("min_size must be at least 1".to_string());
        }
        if min > max {
            return Err(format!("min_size {min} exceeds max_size {max}"));
        }
        Ok(())
    }
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: u64::MAX,
            quick_compare: true,
            partial_hash_head: 4096,
            partial_hash_tail: 4096,
        }
    }
}

impl DuplicateConfig {
    /// Create a new config builder.
    pub fn builder() -> DuplicateConfigBuilder {
        DuplicateConfigBuilder::default()
    }
}

/// Files with identical content.
///
/// Members are ordered by modification time, oldest first, with the path as
/// tie-breaker. The first member is the original; every other member is a
/// duplicate of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Content hash shared by all members.
    pub hash: ContentHash,

    /// Size of each member in bytes.
    pub size: u64,

    /// At least two records, original first.
    pub members: Vec<FileRecord>,

    /// Bytes freed by removing every member except the original.
    pub wasted_bytes: u64,
}

impl DuplicateGroup {
    fn new(hash: ContentHash, size: u64, mut members: Vec<FileRecord>) -> Self {
        members.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        let wasted_bytes = size * (members.len() as u64 - 1);
        Self {
            hash,
            size,
            members,
            wasted_bytes,
        }
    }

    /// The member kept when the others are removed.
    pub fn original(&self) -> &FileRecord {
        &self.members[0]
    }

    /// Every member except the original.
    pub fn duplicates(&self) -> &[FileRecord] {
        &self.members[1..]
    }

    /// Get the number of files in the group.
    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// Whether `path` is a member other than the original.
    pub fn is_duplicate(&self, path: &Path) -> bool {
        self.duplicates().iter().any(|r| r.path == path)
    }
}

/// Duplicate file finder.
#[derive(Debug, Clone, Default)]
pub struct DuplicateDetector {
    config: DuplicateConfig,
}

impl DuplicateDetector {
    /// Create a new detector with default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new detector with custom config.
    pub fn with_config(config: DuplicateConfig) -> Self {
        Self { config }
    }

    /// Group `records` by identical content.
    pub fn detect(&self, records: &[FileRecord]) -> Vec<DuplicateGroup> {
        self.run(records, None)
    }

    /// Like [`detect`](Self::detect), but gives up between size buckets once
    /// `cancel` fires.
    pub fn detect_with_cancel(
        &self,
        records: &[FileRecord],
        cancel: &CancellationToken,
    ) -> Result<Vec<DuplicateGroup>, AnalyzeError> {
        let groups = self.run(records, Some(cancel));
        if cancel.is_cancelled() {
            return Err(AnalyzeError::Cancelled);
        }
        Ok(groups)
    }

    fn run(&self, records: &[FileRecord], cancel: Option<&CancellationToken>) -> Vec<DuplicateGroup> {
        let buckets = self.group_by_size(records);
        tracing::debug!(
            files = records.len(),
            buckets = buckets.len(),
            "hashing size-matched candidates"
        );

        let mut groups: Vec<DuplicateGroup> = buckets
            .into_par_iter()
            .flat_map_iter(|(size, bucket)| {
                if cancel.is_some_and(CancellationToken::is_cancelled) {
                    return Vec::new();
                }
                self.find_in_bucket(size, bucket)
            })
            .collect();

        groups.sort_by(|a, b| {
            b.wasted_bytes
                .cmp(&a.wasted_bytes)
                .then_with(|| a.original().path.cmp(&b.original().path))
        });
        groups
    }

    /// Bucket eligible records by size, dropping singleton buckets.
    fn group_by_size(&self, records: &[FileRecord]) -> Vec<(u64, Vec<FileRecord>)> {
        let mut seen = HashSet::new();
        let mut buckets: HashMap<u64, Vec<FileRecord>> = HashMap::new();

        for record in records {
            if record.size < self.config.min_size || record.size > self.config.max_size {
                continue;
            }
            // The same path listed twice is not a duplicate of itself.
            if !seen.insert(record.path.as_path()) {
                continue;
            }
            buckets.entry(record.size).or_default().push(record.clone());
        }

        buckets.into_iter().filter(|(_, v)| v.len() > 1).collect()
    }

    fn find_in_bucket(&self, size: u64, bucket: Vec<FileRecord>) -> Vec<DuplicateGroup> {
        let candidates = if self.config.quick_compare {
            let keyed: Vec<([u8; 32], FileRecord)> = bucket
                .into_par_iter()
                .filter_map(|record| match self.partial_hash(&record.path) {
                    Ok(hash) => Some((hash, record)),
                    Err(err) => {
                        tracing::warn!(path = %record.path.display(), %err, "skipping unreadable file");
                        None
                    }
                })
                .collect();
            keyed
                .into_iter()
                .into_group_map()
                .into_values()
                .filter(|v| v.len() > 1)
                .collect()
        } else {
            vec![bucket]
        };

        let mut result = Vec::new();
        for candidates in candidates {
            let hashed: Vec<(ContentHash, FileRecord)> = candidates
                .into_par_iter()
                .filter_map(|record| match content_hash(&record.path) {
                    Ok(hash) => Some((hash, record)),
                    Err(err) => {
                        tracing::warn!(path = %record.path.display(), %err, "skipping unreadable file");
                        None
                    }
                })
                .collect();

            for (hash, members) in hashed.into_iter().into_group_map() {
                if members.len() > 1 {
                    result.push(DuplicateGroup::new(hash, size, members));
                }
            }
        }
        result
    }

    /// Hash the first and last bytes of a file together with its length.
    fn partial_hash(&self, path: &Path) -> io::Result<[u8; 32]> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        let mut hasher = Hasher::new();

        let head_size = (self.config.partial_hash_head as u64).min(file_size);
        let mut head_buf = vec![0u8; head_size as usize];
        file.read_exact(&mut head_buf)?;
        hasher.update(&head_buf);

        if file_size > head_size {
            let tail_size = (self.config.partial_hash_tail as u64).min(file_size - head_size);
            if tail_size > 0 {
                file.seek(SeekFrom::End(-(tail_size as i64)))?;
                let mut tail_buf = vec![0u8; tail_size as usize];
                file.read_exact(&mut tail_buf)?;
                hasher.update(&tail_buf);
            }
        }

        hasher.update(&file_size.to_le_bytes());
        Ok(*hasher.finalize().as_bytes())
    }
}

/// Full BLAKE3 digest of a file, read in fixed-size chunks.
pub fn content_hash(path: &Path) -> io::Result<ContentHash> {
    let mut file = File::open(path)?;
    let mut hasher = Hasher::new();
    let mut buffer = vec![0u8; HASH_CHUNK];

    loop {
        let n = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }

    Ok(ContentHash::new(*hasher.finalize().as_bytes()))
}
