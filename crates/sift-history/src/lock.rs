use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, OnceLock};

use fs2::FileExt as _;

/// Exclusive lock around the visible "remove old cache file, rename new one
/// into place" step, shared between threads and between Sift processes.
///
/// The lock is released when the returned value is dropped.
#[derive(Debug)]
pub struct CacheLock {
    file: File,
    path: PathBuf,
}

/// Lock files currently held by this process. `fs2` locks are per process on
/// Unix, so threads wait here before touching the file lock.
struct HeldLocks {
    paths: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

fn held_locks() -> &'static HeldLocks {
    static HELD: OnceLock<HeldLocks> = OnceLock::new();
    HELD.get_or_init(|| HeldLocks {
        paths: Mutex::new(HashSet::new()),
        released: Condvar::new(),
    })
}

impl HeldLocks {
    fn acquire(&self, path: &Path) {
        let mut paths = self
            .paths
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while paths.contains(path) {
            paths = self
                .released
                .wait(paths)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        paths.insert(path.to_path_buf());
    }

    fn release(&self, path: &Path) {
        self.paths
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(path);
        self.released.notify_all();
    }
}

impl CacheLock {
    /// Acquire an exclusive lock on `path`, creating the lockfile if needed.
    ///
    /// Blocks until the lock is available.
    pub fn lock_exclusive(path: &Path) -> io::Result<Self> {
        let held = held_locks();
        held.acquire(path);

        match open_and_lock(path) {
            Ok(file) => Ok(Self {
                file,
                path: path.to_path_buf(),
            }),
            Err(err) => {
                held.release(path);
                Err(err)
            }
        }
    }
}

fn open_and_lock(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;
    file.lock_exclusive()?;
    Ok(file)
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            tracing::trace!(
                target = "sift.history",
                path = %self.path.display(),
                error = %err,
                "failed to release cache lock"
            );
        }
        held_locks().release(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn lock_excludes_other_threads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("historycache.lock");

        let held = CacheLock::lock_exclusive(&path).unwrap();
        assert!(path.exists());

        let acquired = Arc::new(AtomicBool::new(false));
        let handle = {
            let path = path.clone();
            let acquired = Arc::clone(&acquired);
            std::thread::spawn(move || {
                let _lock = CacheLock::lock_exclusive(&path).unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(held);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
