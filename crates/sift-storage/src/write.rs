use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::StorageError;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Writes `bytes` to a fresh, uniquely named temporary file next to `dest`.
///
/// The caller is responsible for moving the returned path into place (or
/// removing it). On failure no temporary file is left behind.
pub fn write_tmp_file(dest: &Path, bytes: &[u8]) -> Result<PathBuf, StorageError> {
    let parent = parent_or_cwd(dest)?;
    let (tmp_path, mut file) = open_unique_tmp_file(dest, parent)?;

    let write_result = (|| -> io::Result<()> {
        file.write_all(bytes)?;
        file.sync_all()
    })();
    drop(file);

    if let Err(err) = write_result {
        remove_file_best_effort(&tmp_path, "write_tmp_file.cleanup");
        return Err(err.into());
    }

    Ok(tmp_path)
}

/// Atomically replaces `path` with `bytes` (temp file + rename), creating
/// parent directories as needed.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent = parent_or_cwd(path)?;
    fs::create_dir_all(parent)?;

    let tmp_path = write_tmp_file(path, bytes)?;
    if let Err(err) = rename_overwrite(&tmp_path, path) {
        remove_file_best_effort(&tmp_path, "atomic_write.rename_failed");
        return Err(err.into());
    }

    sync_dir_best_effort(parent);
    Ok(())
}

/// Renames `tmp_path` onto `dest`, replacing any existing file.
pub fn rename_overwrite(tmp_path: &Path, dest: &Path) -> io::Result<()> {
    const MAX_RENAME_ATTEMPTS: usize = 1024;
    let mut attempts = 0usize;

    loop {
        match fs::rename(tmp_path, dest) {
            Ok(()) => return Ok(()),
            Err(err)
                if cfg!(windows)
                    && (err.kind() == io::ErrorKind::AlreadyExists || dest.exists()) =>
            {
                // `rename` doesn't overwrite on Windows; concurrent writers may race.
                match fs::remove_file(dest) {
                    Ok(()) => {}
                    Err(remove_err) if remove_err.kind() == io::ErrorKind::NotFound => {}
                    Err(remove_err) => return Err(remove_err),
                }

                attempts += 1;
                if attempts >= MAX_RENAME_ATTEMPTS {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Removes `path`, treating "already gone" as success. Failures are logged
/// at debug level with `reason` and reported as `false`.
pub fn remove_file_best_effort(path: &Path, reason: &'static str) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => {
            tracing::debug!(
                target = "sift.storage",
                path = %path.display(),
                reason,
                error = %err,
                "failed to remove file"
            );
            false
        }
    }
}

fn parent_or_cwd(path: &Path) -> io::Result<&Path> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::other("path has no parent"))?;
    Ok(if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    })
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp.{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

#[cfg(unix)]
fn sync_dir_best_effort(dir: &Path) {
    if let Err(err) = fs::File::open(dir).and_then(|f| f.sync_all()) {
        tracing::trace!(
            target = "sift.storage",
            path = %dir.display(),
            error = %err,
            "failed to sync directory"
        );
    }
}

#[cfg(not(unix))]
fn sync_dir_best_effort(_dir: &Path) {}
