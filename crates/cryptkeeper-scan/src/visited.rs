//! Directory identity tracking for symlink cycle detection.

use std::path::Path;

use dashmap::DashSet;

#[cfg(unix)]
type DirIdentity = (u64, u64);

#[cfg(not(unix))]
type DirIdentity = std::path::PathBuf;

/// Tracks directories already descended into.
///
/// When links are followed, the same directory can be reached through more
/// than one path, and a link pointing at an ancestor would recurse forever.
/// Directories are keyed by (device, inode) on Unix and by canonical path
/// elsewhere, so every physical directory is walked at most once.
#[derive(Debug, Default)]
pub struct VisitedDirs {
    seen: DashSet<DirIdentity>,
}

impl VisitedDirs {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            seen: DashSet::new(),
        }
    }

    /// Mark a directory as visited. Returns `true` if this is the first time
    /// it is seen.
    ///
    /// Directories whose identity cannot be read are reported as new; the
    /// walker will hit the same error when it tries to list them.
    pub fn visit(&self, path: &Path) -> bool {
        match identity(path) {
            Some(id) => self.seen.insert(id),
            None => true,
        }
    }

    /// Check if a directory has been visited (without tracking).
    pub fn has_visited(&self, path: &Path) -> bool {
        identity(path).is_some_and(|id| self.seen.contains(&id))
    }

    /// Get the number of unique directories tracked.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Check if no directories have been tracked.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(unix)]
fn identity(path: &Path) -> Option<DirIdentity> {
    use std::os::unix::fs::MetadataExt;
    let metadata = std::fs::metadata(path).ok()?;
    Some((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn identity(path: &Path) -> Option<DirIdentity> {
    path.canonicalize().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_visit_once() {
        let temp = TempDir::new().unwrap();
        let visited = VisitedDirs::new();

        assert!(visited.visit(temp.path()));
        assert!(!visited.visit(temp.path()));
        assert_eq!(visited.len(), 1);
    }

    #[test]
    fn test_has_visited() {
        let temp = TempDir::new().unwrap();
        let visited = VisitedDirs::new();

        assert!(!visited.has_visited(temp.path()));
        visited.visit(temp.path());
        assert!(visited.has_visited(temp.path()));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_resolves_to_same_identity() {
        let temp = TempDir::new().unwrap();
        let real = temp.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let link = temp.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let visited = VisitedDirs::new();
        assert!(visited.visit(&real));
        assert!(!visited.visit(&link));
    }

    #[test]
    fn test_missing_directory_counts_as_new() {
        let visited = VisitedDirs::new();
        assert!(visited.visit(Path::new("/definitely/not/here")));
        assert!(visited.is_empty());
    }
}
