//! Moving a single file without ever overwriting or losing it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::Path;

use filetime::FileTime;

use crate::error::CustodyError;

const HASH_CHUNK: usize = 64 * 1024;

/// Move `source` to `dest`, which must not exist yet.
///
/// Tries a rename first. When source and destination are on different
/// volumes the file is copied, synced and verified before the source is
/// removed. Returns the number of bytes moved.
pub(crate) fn move_file(source: &Path, dest: &Path) -> Result<u64, CustodyError> {
    let metadata = fs::symlink_metadata(source).map_err(|e| CustodyError::io(source, e))?;

    match fs::rename(source, dest) {
        Ok(()) => Ok(metadata.len()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!(
                source = %source.display(),
                dest = %dest.display(),
                "crossing volumes, copying"
            );
            copy_verified(source, dest, &metadata)?;
            if let Err(e) = fs::remove_file(source) {
                let _ = fs::remove_file(dest);
                return Err(CustodyError::io(source, e));
            }
            Ok(metadata.len())
        }
        Err(e) => Err(CustodyError::io(source, e)),
    }
}

/// Copy `source` to a new file at `dest` and prove the copy is identical.
///
/// Fails with [`CustodyError::Conflict`] if `dest` already exists. On any
/// later failure the partial copy is removed; the source is never touched.
pub(crate) fn copy_verified(
    source: &Path,
    dest: &Path,
    metadata: &fs::Metadata,
) -> Result<(), CustodyError> {
    let writer = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .map_err(|e| CustodyError::io(dest, e))?;

    let result = copy_and_check(source, dest, writer, metadata);
    if result.is_err() {
        let _ = fs::remove_file(dest);
    }
    result
}

fn copy_and_check(
    source: &Path,
    dest: &Path,
    mut writer: File,
    metadata: &fs::Metadata,
) -> Result<(), CustodyError> {
    let mut reader = File::open(source).map_err(|e| CustodyError::io(source, e))?;
    io::copy(&mut reader, &mut writer).map_err(|e| CustodyError::io(dest, e))?;
    writer.sync_all().map_err(|e| CustodyError::io(dest, e))?;
    drop(writer);

    let copied_len = fs::metadata(dest).map_err(|e| CustodyError::io(dest, e))?.len();
    if copied_len != metadata.len() {
        return Err(CustodyError::VerifyFailed {
            path: dest.to_path_buf(),
            message: format!("expected {} bytes, found {copied_len}", metadata.len()),
        });
    }

    let expected = digest(source).map_err(|e| CustodyError::io(source, e))?;
    let actual = digest(dest).map_err(|e| CustodyError::io(dest, e))?;
    if expected != actual {
        return Err(CustodyError::VerifyFailed {
            path: dest.to_path_buf(),
            message: "content digest mismatch".to_string(),
        });
    }

    let mtime = FileTime::from_last_modification_time(metadata);
    filetime::set_file_mtime(dest, mtime).map_err(|e| CustodyError::io(dest, e))?;
    Ok(())
}

/// Streaming BLAKE3 digest of a file.
pub(crate) fn digest(path: &Path) -> io::Result<blake3::Hash> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; HASH_CHUNK];
    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                hasher.update(&buffer[..n]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(hasher.finalize())
}
