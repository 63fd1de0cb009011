//! The graveyard: a mirrored directory tree that holds banished files.
//!
//! A file at `/home/u/old.iso` is moved to `<root>/home/u/old.iso`. The log
//! line is rendered before the move and written after it, so a path the log
//! cannot hold is refused up front, and a crash in between leaves an
//! unlogged file in the graveyard rather than a log entry pointing at
//! nothing. Reconciliation reports either kind of orphan.

use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use cryptkeeper_core::{ClassificationSet, ClassifiedFile, GuardVerdict, PathGuard};

use crate::conflict::{occupied, unique_destination};
use crate::error::CustodyError;
use crate::log::{EncodedEntry, GraveyardLog, LogEntry};
use crate::transfer::move_file;
use crate::undo::SessionId;

/// A file to banish, with the tags that justified it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanishRequest {
    pub path: PathBuf,
    pub classifications: ClassificationSet,
    /// Size as seen by the scan. The size on disk at move time wins.
    pub size: Option<u64>,
}

impl BanishRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            classifications: ClassificationSet::empty(),
            size: None,
        }
    }

    pub fn with_classifications(mut self, classifications: ClassificationSet) -> Self {
        self.classifications = classifications;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

impl From<&ClassifiedFile> for BanishRequest {
    fn from(file: &ClassifiedFile) -> Self {
        Self::new(file.record.path.clone())
            .with_classifications(file.classifications)
            .with_size(file.record.size)
    }
}

/// A completed banishment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Banished {
    pub original_path: PathBuf,
    pub graveyard_path: PathBuf,
    pub size: u64,
}

/// A completed restoration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restored {
    pub original_path: PathBuf,
    pub graveyard_path: PathBuf,
    pub size: u64,
}

/// Moves files into and out of the graveyard and records each move.
pub struct QuarantineStore {
    root: PathBuf,
    guard: Arc<PathGuard>,
    log: Arc<GraveyardLog>,
    /// Held from destination choice until the log entry is written.
    custody: Mutex<()>,
}

impl QuarantineStore {
    /// Open the graveyard at `root`, creating it if needed.
    pub fn open(
        root: impl Into<PathBuf>,
        guard: Arc<PathGuard>,
        log: Arc<GraveyardLog>,
    ) -> Result<Self, CustodyError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| CustodyError::io(&root, e))?;
        let root = root.canonicalize().map_err(|e| CustodyError::io(&root, e))?;
        Ok(Self {
            root,
            guard,
            log,
            custody: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log(&self) -> &Arc<GraveyardLog> {
        &self.log
    }

    /// Move a file into the graveyard and log it.
    pub fn banish(&self, request: &BanishRequest) -> Result<Banished, CustodyError> {
        self.banish_in_session(request, None)
    }

    pub(crate) fn banish_in_session(
        &self,
        request: &BanishRequest,
        session: Option<SessionId>,
    ) -> Result<Banished, CustodyError> {
        let source = self.resolve_source(&request.path)?;

        let _custody = self.custody.lock();
        let dest = unique_destination(&self.mirror_path(&source));
        let size = fs::symlink_metadata(&source)
            .map_err(|e| CustodyError::io(&source, e))?
            .len();
        let entry = LogEntry::banish(&source, &dest, request.classifications, size)
            .with_session(session);
        let encoded = self.encode(entry, &source)?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| CustodyError::io(parent, e))?;
        }

        let size = move_file(&source, &dest)?;
        tracing::debug!(from = %source.display(), to = %dest.display(), "moved into graveyard");

        self.log
            .append_encoded(encoded)
            .map_err(|source| CustodyError::Unlogged {
                path: dest.clone(),
                source,
            })?;

        tracing::info!(path = %source.display(), size, "banished");
        Ok(Banished {
            original_path: source,
            graveyard_path: dest,
            size,
        })
    }

    /// Move a graveyard file back to `original_path` and log it.
    ///
    /// Nothing is moved if anything already occupies `original_path`.
    pub fn restore(
        &self,
        graveyard_path: &Path,
        original_path: &Path,
    ) -> Result<Restored, CustodyError> {
        if !original_path.is_absolute() {
            return Err(CustodyError::NotAbsolute {
                path: original_path.to_path_buf(),
            });
        }
        if !self.contains(graveyard_path) {
            return Err(CustodyError::OutsideGraveyard {
                path: graveyard_path.to_path_buf(),
            });
        }

        let _custody = self.custody.lock();
        let metadata =
            fs::symlink_metadata(graveyard_path).map_err(|e| CustodyError::io(graveyard_path, e))?;
        if !metadata.is_file() {
            return Err(CustodyError::NotAFile {
                path: graveyard_path.to_path_buf(),
            });
        }
        if occupied(original_path) {
            return Err(CustodyError::Conflict {
                path: original_path.to_path_buf(),
            });
        }
        self.check_guard(original_path)?;

        let encoded = self.encode(
            LogEntry::restore(graveyard_path, original_path),
            original_path,
        )?;

        if let Some(parent) = original_path.parent() {
            fs::create_dir_all(parent).map_err(|e| CustodyError::io(parent, e))?;
        }
        let size = move_file(graveyard_path, original_path)?;

        self.log
            .append_encoded(encoded)
            .map_err(|source| CustodyError::Unlogged {
                path: original_path.to_path_buf(),
                source,
            })?;

        self.prune_empty_dirs(graveyard_path);
        tracing::info!(path = %original_path.display(), size, "restored");

        Ok(Restored {
            original_path: original_path.to_path_buf(),
            graveyard_path: graveyard_path.to_path_buf(),
            size,
        })
    }

    /// Where a file from `original` lands in the graveyard, before collision
    /// suffixing.
    pub fn mirror_path(&self, original: &Path) -> PathBuf {
        let mut dest = self.root.clone();
        for component in original.components() {
            match component {
                Component::Prefix(prefix) => dest.push(flatten_prefix(prefix.as_os_str())),
                Component::Normal(part) => dest.push(part),
                Component::RootDir | Component::CurDir | Component::ParentDir => {}
            }
        }
        dest
    }

    /// Whether `path` lies inside the graveyard root.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
            && path != self.root
            && !path.components().any(|c| c == Component::ParentDir)
    }

    /// Validate a banish source and return it with its parent resolved.
    fn resolve_source(&self, path: &Path) -> Result<PathBuf, CustodyError> {
        if !path.is_absolute() {
            return Err(CustodyError::NotAbsolute {
                path: path.to_path_buf(),
            });
        }

        let metadata = fs::symlink_metadata(path).map_err(|e| CustodyError::io(path, e))?;
        if !metadata.is_file() {
            return Err(CustodyError::NotAFile {
                path: path.to_path_buf(),
            });
        }

        // Resolve the directory but not the file itself: a symlink would
        // otherwise be followed to its target.
        let source = match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => parent
                .canonicalize()
                .map_err(|e| CustodyError::io(parent, e))?
                .join(name),
            _ => path.to_path_buf(),
        };

        if self.contains(&source) {
            return Err(CustodyError::Forbidden {
                path: source,
                reason: "already inside the graveyard".to_string(),
            });
        }
        self.check_guard(&source)?;
        Ok(source)
    }

    fn encode(&self, entry: LogEntry, path: &Path) -> Result<EncodedEntry, CustodyError> {
        self.log
            .encode(entry)
            .map_err(|source| CustodyError::Unrecordable {
                path: path.to_path_buf(),
                source,
            })
    }

    fn check_guard(&self, path: &Path) -> Result<(), CustodyError> {
        let targets = std::iter::once(path).chain(path.parent());
        for target in targets {
            if let GuardVerdict::Forbidden(reason) = self.guard.check(target) {
                return Err(CustodyError::Forbidden {
                    path: path.to_path_buf(),
                    reason,
                });
            }
        }
        Ok(())
    }

    /// Remove now-empty directories from `graveyard_path`'s parent up to,
    /// but not including, the root.
    fn prune_empty_dirs(&self, graveyard_path: &Path) {
        let mut dir = graveyard_path.parent();
        while let Some(current) = dir {
            if !self.contains(current) || fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

/// Turn a drive prefix such as `C:` or `\\?\C:` into a plain component.
fn flatten_prefix(prefix: &std::ffi::OsStr) -> OsString {
    let flat: String = prefix
        .to_string_lossy()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_' || *c == '.')
        .collect();
    if flat.is_empty() {
        OsString::from("drive")
    } else {
        OsString::from(flat)
    }
}
