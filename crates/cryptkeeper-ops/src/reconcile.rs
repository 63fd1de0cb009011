//! Cross-checking the graveyard directory against the log.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::log::{GraveyardLog, LogEntry};

/// A disagreement between the graveyard and its log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Orphan {
    /// A file in the graveyard that no live Banish entry accounts for.
    Unlogged { path: PathBuf },
    /// A live Banish entry whose file is no longer in the graveyard.
    Missing { entry: LogEntry },
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub orphans: Vec<Orphan>,
    /// Regular files found under the graveyard root.
    pub physical_files: usize,
    /// Banish entries not yet matched by a Restore.
    pub logged_entries: usize,
}

impl ReconcileReport {
    pub fn is_consistent(&self) -> bool {
        self.orphans.is_empty()
    }

    pub fn unlogged(&self) -> impl Iterator<Item = &Path> {
        self.orphans.iter().filter_map(|o| match o {
            Orphan::Unlogged { path } => Some(path.as_path()),
            Orphan::Missing { .. } => None,
        })
    }

    pub fn missing(&self) -> impl Iterator<Item = &LogEntry> {
        self.orphans.iter().filter_map(|o| match o {
            Orphan::Missing { entry } => Some(entry),
            Orphan::Unlogged { .. } => None,
        })
    }
}

/// Compare the files under `graveyard_root` with the live Banish entries in
/// `log`. Reports, never repairs.
pub fn reconcile(graveyard_root: &Path, log: &GraveyardLog) -> ReconcileReport {
    let mut physical = Vec::new();
    collect_files(graveyard_root, &mut physical);

    let live = log.current_graveyard();
    let logged: HashSet<&Path> = live
        .iter()
        .filter_map(|e| e.graveyard_path.as_deref())
        .collect();

    let mut orphans: Vec<Orphan> = physical
        .iter()
        .filter(|p| !logged.contains(p.as_path()))
        .map(|p| Orphan::Unlogged { path: p.clone() })
        .collect();

    let on_disk: HashSet<&Path> = physical.iter().map(PathBuf::as_path).collect();
    orphans.extend(
        live.iter()
            .filter(|e| {
                e.graveyard_path
                    .as_deref()
                    .is_some_and(|p| !on_disk.contains(p))
            })
            .map(|e| Orphan::Missing { entry: e.clone() }),
    );

    for orphan in &orphans {
        match orphan {
            Orphan::Unlogged { path } => {
                tracing::warn!(path = %path.display(), "graveyard file has no log entry");
            }
            Orphan::Missing { entry } => {
                tracing::warn!(path = %entry.file_path.display(), "logged graveyard file is missing");
            }
        }
    }

    ReconcileReport {
        orphans,
        physical_files: physical.len(),
        logged_entries: live.len(),
    }
}

/// Recursively list regular files. Unreadable directories are skipped.
fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(path = %dir.display(), %err, "cannot read graveyard directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        match entry.file_type() {
            Ok(t) if t.is_dir() => collect_files(&path, files),
            Ok(t) if t.is_file() => files.push(path),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptkeeper_core::ClassificationSet;
    use tempfile::TempDir;

    #[test]
    fn test_both_orphan_kinds() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("graveyard");
        fs::create_dir_all(root.join("home/u")).unwrap();
        let log = GraveyardLog::open(temp.path().join("g.jsonl")).unwrap();

        let logged = root.join("home/u/logged.txt");
        fs::write(&logged, "ok").unwrap();
        log.append(LogEntry::banish("/home/u/logged.txt", &logged, ClassificationSet::empty(), 2))
            .unwrap();

        let stray = root.join("home/u/stray.txt");
        fs::write(&stray, "?").unwrap();

        let gone = root.join("home/u/gone.txt");
        log.append(LogEntry::banish("/home/u/gone.txt", &gone, ClassificationSet::empty(), 1))
            .unwrap();

        let report = reconcile(&root, &log);

        assert_eq!(report.physical_files, 2);
        assert_eq!(report.logged_entries, 2);
        assert_eq!(report.unlogged().collect::<Vec<_>>(), vec![stray.as_path()]);
        let missing: Vec<_> = report.missing().collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].graveyard_path.as_deref(), Some(gone.as_path()));
        assert!(logged.exists() && stray.exists());
    }

    #[test]
    fn test_empty_graveyard_is_consistent() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("graveyard");
        fs::create_dir(&root).unwrap();
        let log = GraveyardLog::open(temp.path().join("g.jsonl")).unwrap();

        assert!(reconcile(&root, &log).is_consistent());
    }
}
