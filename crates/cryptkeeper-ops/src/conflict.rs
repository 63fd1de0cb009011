//! Destination collision handling.

use std::path::{Path, PathBuf};

/// Whether anything (file, directory, or dangling link) sits at `path`.
pub fn occupied(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// Pick a free name next to `path`.
///
/// Returns `path` itself when it is free, otherwise "file (1).txt",
/// "file (2).txt", and so on.
pub fn unique_destination(path: &Path) -> PathBuf {
    if !occupied(path) {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or(Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

    (1u64..)
        .map(|i| {
            let name = match &extension {
                Some(ext) => format!("{stem} ({i}).{ext}"),
                None => format!("{stem} ({i})"),
            };
            parent.join(name)
        })
        .find(|candidate| !occupied(candidate))
        .unwrap_or_else(|| path.to_path_buf())
}
