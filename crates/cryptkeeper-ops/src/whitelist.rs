//! Durable set of paths the classifier must never tag.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use cryptkeeper_core::Exclusions;

use crate::durable::{preserve_corrupt, write_atomic};
use crate::error::StoreError;

const RECORD_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct WhitelistRecord {
    version: u32,
    paths: BTreeSet<PathBuf>,
}

/// The whitelist, mirrored in memory and rewritten in full on every change.
pub struct WhitelistStore {
    path: PathBuf,
    paths: Mutex<BTreeSet<PathBuf>>,
}

impl WhitelistStore {
    /// Load the whitelist at `path`.
    ///
    /// A missing or unreadable record starts empty and is written back
    /// immediately; an unreadable one is first kept aside as `*.corrupt`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let (paths, rewrite) = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<WhitelistRecord>(&bytes) {
                Ok(record) if record.version == RECORD_VERSION => (record.paths, false),
                Ok(record) => {
                    recover_corrupt(&path, &format!("unsupported version {}", record.version))?;
                    (BTreeSet::new(), true)
                }
                Err(err) => {
                    recover_corrupt(&path, &err.to_string())?;
                    (BTreeSet::new(), true)
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => (BTreeSet::new(), true),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        if rewrite {
            persist(&path, &paths)?;
        }

        Ok(Self {
            path,
            paths: Mutex::new(paths),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a path. Returns `false` if it was already present.
    pub fn add(&self, path: impl Into<PathBuf>) -> Result<bool, StoreError> {
        let path = path.into();
        let mut paths = self.paths.lock();
        if !paths.insert(path.clone()) {
            return Ok(false);
        }
        if let Err(e) = persist(&self.path, &paths) {
            paths.remove(&path);
            return Err(e);
        }
        tracing::info!(path = %path.display(), "whitelisted");
        Ok(true)
    }

    /// Remove a path. Returns `false` if it was not present.
    pub fn remove(&self, path: &Path) -> Result<bool, StoreError> {
        let mut paths = self.paths.lock();
        if !paths.remove(path) {
            return Ok(false);
        }
        if let Err(e) = persist(&self.path, &paths) {
            paths.insert(path.to_path_buf());
            return Err(e);
        }
        tracing::info!(path = %path.display(), "removed from whitelist");
        Ok(true)
    }

    pub fn has(&self, path: &Path) -> bool {
        self.paths.lock().contains(path)
    }

    /// Every whitelisted path, sorted.
    pub fn all(&self) -> Vec<PathBuf> {
        self.paths.lock().iter().cloned().collect()
    }

    /// A point-in-time copy usable as classifier exclusions without holding
    /// the store lock.
    pub fn snapshot(&self) -> BTreeSet<PathBuf> {
        self.paths.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.paths.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Exclusions for WhitelistStore {
    fn is_excluded(&self, path: &Path) -> bool {
        self.has(path)
    }
}

fn recover_corrupt(path: &Path, reason: &str) -> Result<(), StoreError> {
    let aside = preserve_corrupt(path).map_err(|e| StoreError::io(path, e))?;
    tracing::warn!(
        path = %path.display(),
        aside = %aside.display(),
        reason,
        "whitelist record unreadable, starting empty"
    );
    Ok(())
}

fn persist(path: &Path, paths: &BTreeSet<PathBuf>) -> Result<(), StoreError> {
    let record = WhitelistRecord {
        version: RECORD_VERSION,
        paths: paths.clone(),
    };
    let json = serde_json::to_vec_pretty(&record).map_err(|source| StoreError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &json).map_err(|e| StoreError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_record_is_created() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("whitelist.json");

        let store = WhitelistStore::open(&path).unwrap();

        assert!(store.is_empty());
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"version\": 1"));
    }

    #[test]
    fn test_add_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = WhitelistStore::open(temp.path().join("whitelist.json")).unwrap();

        assert!(store.add("/home/u/keep.txt").unwrap());
        assert!(!store.add("/home/u/keep.txt").unwrap());
        assert_eq!(store.len(), 1);
        assert!(store.is_excluded(Path::new("/home/u/keep.txt")));
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("whitelist.json");
        let store = WhitelistStore::open(&path).unwrap();
        store.add("/a").unwrap();

        assert!(store.remove(Path::new("/a")).unwrap());
        assert!(!store.remove(Path::new("/a")).unwrap());
        assert!(WhitelistStore::open(&path).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_record_recovered() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("whitelist.json");
        fs::write(&path, "{not json").unwrap();

        let store = WhitelistStore::open(&path).unwrap();

        assert!(store.is_empty());
        assert_eq!(
            fs::read_to_string(temp.path().join("whitelist.json.corrupt")).unwrap(),
            "{not json"
        );
        let record: WhitelistRecord =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(record.paths.is_empty());
    }

    #[test]
    fn test_unknown_version_treated_as_corrupt() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("whitelist.json");
        fs::write(&path, r#"{"version":9,"paths":["/a"]}"#).unwrap();

        let store = WhitelistStore::open(&path).unwrap();
        assert!(store.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_write_rolls_back() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("ro");
        fs::create_dir(&dir).unwrap();
        let store = WhitelistStore::open(dir.join("whitelist.json")).unwrap();

        fs::set_permissions(&dir, fs::Permissions::from_mode(0o500)).unwrap();
        let canary = fs::write(dir.join("canary"), "");
        let result = store.add("/a");
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700)).unwrap();

        // Privileged users can write anyway; only check rollback when the
        // directory really was read-only.
        if canary.is_err() {
            assert!(result.is_err());
            assert!(!store.has(Path::new("/a")));
        }
    }
}
