//! Crash-safe file writes shared by the durable records.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Replace `path` with `bytes` via a synced temp file and a rename.
///
/// Readers see either the old content or the new content, never a mix.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp_path = sibling(path, ".tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let result = (|| {
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        sync_parent(path);
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Copy an unreadable record aside as `<name>.corrupt` before it is replaced.
pub(crate) fn preserve_corrupt(path: &Path) -> io::Result<PathBuf> {
    let aside = sibling(path, ".corrupt");
    fs::copy(path, &aside)?;
    Ok(aside)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("record"));
    name.push(suffix);
    path.with_file_name(name)
}

/// Persist the directory entry of a freshly renamed file. Best effort.
#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(dir) = path.parent().and_then(|p| fs::File::open(p).ok()) {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
