use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::Path;

use crate::error::{HiveError, Result};

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    Ok(file)
}

/// Acquire an exclusive lock on a file without blocking, returning the locked
/// File handle. The lock is released when the File is dropped or the owning
/// process exits.
pub fn acquire_lock(path: &Path) -> Result<File> {
    let file = open_lock_file(path)?;
    file.try_lock_exclusive()
        .map_err(|_| HiveError::Locked(path.display().to_string()))?;
    Ok(file)
}

/// Release lock explicitly (normally handled by Drop).
pub fn release_lock(file: File) -> Result<()> {
    file.unlock()?;
    Ok(())
}

/// Check whether anyone currently holds the lock on `path`.
///
/// Opens a fresh handle and attempts a non-blocking exclusive lock. If that
/// succeeds the lock is released immediately and `false` is returned.
/// A missing lock file means nobody has ever held it.
///
/// The check holds the lock for a moment, so an `acquire_lock` racing it can
/// fail with `Locked` even though nobody owns the file. Contenders that see
/// the lock taken should retry before concluding it is held.
pub fn is_locked(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => {
            file.unlock()?;
            Ok(false)
        }
        Err(_) => Ok(true),
    }
}
