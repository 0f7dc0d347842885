use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use sift_core::{cmp_deepest_first, normalize_lexically, tandem_join};

use crate::error::{CompleteError, Stage};
use crate::skeleton::fileless_children;

/// Suffix naming the in-progress companion of an artifact.
pub const PENDING_EXTENSION: &str = ".pending";

/// An artifact to delete, identified by its absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingDeletion {
    absolute_path: PathBuf,
}

impl PendingDeletion {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            absolute_path: absolutize(path.as_ref()),
        }
    }

    pub fn absolute_path(&self) -> &Path {
        &self.absolute_path
    }
}

/// A fully written transient file to move onto its final path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingRenaming {
    transient_path: PathBuf,
    absolute_path: PathBuf,
}

impl PendingRenaming {
    pub fn new(transient_path: impl AsRef<Path>, absolute_path: impl AsRef<Path>) -> Self {
        Self {
            transient_path: absolutize(transient_path.as_ref()),
            absolute_path: absolutize(absolute_path.as_ref()),
        }
    }

    pub fn transient_path(&self) -> &Path {
        &self.transient_path
    }

    pub fn absolute_path(&self) -> &Path {
        &self.absolute_path
    }
}

/// Absolute path with `.` and `..` resolved, so equal targets share a key.
fn absolutize(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    normalize_lexically(&absolute)
}

/// Stages deletions and renamings of index artifacts during an indexing pass
/// and applies them as late as possible.
///
/// A path that is the destination of a staged renaming is never staged for
/// deletion at the same time.
#[derive(Debug, Default)]
pub struct PendingFileCompleter {
    deletions: HashSet<PendingDeletion>,
    renamings: HashSet<PendingRenaming>,
    renaming_targets: HashSet<PathBuf>,
}

impl PendingFileCompleter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a deletion. Returns `true` if it was not staged yet.
    ///
    /// Paths that a staged renaming moves a file onto are not staged.
    pub fn add_deletion(&mut self, deletion: PendingDeletion) -> bool {
        if self.renaming_targets.contains(&deletion.absolute_path) {
            tracing::trace!(
                target = "sift.index",
                path = %deletion.absolute_path.display(),
                "not staging deletion of a renaming target"
            );
            return false;
        }
        self.deletions.insert(deletion)
    }

    /// Unstage a deletion. Returns `true` if it was staged.
    pub fn remove_deletion(&mut self, deletion: &PendingDeletion) -> bool {
        self.deletions.remove(deletion)
    }

    /// Stage a renaming, dropping any staged deletion of its destination.
    /// Returns `true` if it was not staged yet.
    pub fn add_renaming(&mut self, renaming: PendingRenaming) -> bool {
        self.deletions.remove(&PendingDeletion {
            absolute_path: renaming.absolute_path.clone(),
        });
        self.renaming_targets
            .insert(renaming.absolute_path.clone());
        self.renamings.insert(renaming)
    }

    pub fn pending_deletions(&self) -> usize {
        self.deletions.len()
    }

    pub fn pending_renamings(&self) -> usize {
        self.renamings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.renamings.is_empty()
    }

    /// Apply all staged deletions (followed by empty-directory cleanup) and
    /// then all staged renamings, returning the number of successful
    /// operations.
    ///
    /// Both sets are consumed regardless of the outcome. A failed deletion
    /// stage is reported without attempting the renamings.
    pub fn complete(&mut self) -> Result<usize, CompleteError> {
        let deletions: Vec<PendingDeletion> = self.deletions.drain().collect();
        let renamings: Vec<PendingRenaming> = self.renamings.drain().collect();
        self.renaming_targets.clear();

        let deleted = complete_deletions(&deletions)?;
        tracing::debug!(target = "sift.index", count = deleted, "deleted pending files");

        let renamed = complete_renamings(&renamings)?;
        tracing::debug!(target = "sift.index", count = renamed, "renamed pending files");

        Ok(deleted + renamed)
    }
}

fn complete_deletions(deletions: &[PendingDeletion]) -> Result<usize, CompleteError> {
    if deletions.is_empty() {
        return Ok(0);
    }

    let results: Vec<io::Result<()>> = deletions
        .par_iter()
        .map(|deletion| delete_with_pending(&deletion.absolute_path))
        .collect();

    let mut parents = Vec::new();
    let mut failures = 0usize;
    let mut first_error = None;
    for (deletion, result) in deletions.iter().zip(results) {
        match result {
            Ok(()) => {
                if let Some(parent) = deletion.absolute_path.parent() {
                    parents.push(parent.to_path_buf());
                }
            }
            Err(err) => {
                failures += 1;
                first_error.get_or_insert(err);
            }
        }
    }

    try_delete_parents(parents);

    match first_error {
        Some(source) => Err(CompleteError::new(
            Stage::Deleting,
            failures,
            deletions.len(),
            source,
        )),
        None => Ok(deletions.len()),
    }
}

fn complete_renamings(renamings: &[PendingRenaming]) -> Result<usize, CompleteError> {
    if renamings.is_empty() {
        return Ok(0);
    }

    let results: Vec<io::Result<()>> = renamings.par_iter().map(do_rename).collect();

    let mut failures = 0usize;
    let mut first_error = None;
    for err in results.into_iter().filter_map(Result::err) {
        failures += 1;
        first_error.get_or_insert(err);
    }

    match first_error {
        Some(source) => Err(CompleteError::new(
            Stage::Renaming,
            failures,
            renamings.len(),
            source,
        )),
        None => Ok(renamings.len()),
    }
}

/// Delete `path + PENDING_EXTENSION`, then `path`.
fn delete_with_pending(path: &Path) -> io::Result<()> {
    delete_file(&tandem_join(path, PENDING_EXTENSION))?;
    delete_file(path)
}

fn delete_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::trace!(
                target = "sift.index",
                path = %path.display(),
                "deleted obsolete file"
            );
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            tracing::warn!(
                target = "sift.index",
                path = %path.display(),
                error = %err,
                "failed to delete obsolete file"
            );
            Err(err)
        }
    }
}

fn do_rename(renaming: &PendingRenaming) -> io::Result<()> {
    let result = (|| {
        if let Some(parent) = renaming.absolute_path.parent() {
            fs::create_dir_all(parent)?;
        }
        sift_storage::rename_overwrite(&renaming.transient_path, &renaming.absolute_path)
    })();

    match &result {
        Ok(()) => tracing::trace!(
            target = "sift.index",
            path = %renaming.absolute_path.display(),
            "moved pending file into place"
        ),
        Err(err) => tracing::warn!(
            target = "sift.index",
            source = %renaming.transient_path.display(),
            path = %renaming.absolute_path.display(),
            error = %err,
            "failed to move pending file"
        ),
    }
    result
}

/// Remove the parents of deleted files (deepest first) together with their
/// fileless descendants. Directories that cannot be removed are left alone.
fn try_delete_parents(mut parents: Vec<PathBuf>) {
    parents.sort_by(|a, b| cmp_deepest_first(a, b));
    parents.dedup();

    for dir in parents {
        for child in fileless_children(&dir) {
            try_delete_dir(&child);
        }
        try_delete_dir(&dir);
    }
}

fn try_delete_dir(dir: &Path) {
    match fs::remove_dir(dir) {
        Ok(()) => tracing::debug!(
            target = "sift.index",
            path = %dir.display(),
            "removed empty directory"
        ),
        Err(err) => tracing::trace!(
            target = "sift.index",
            path = %dir.display(),
            error = %err,
            "kept directory"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_the_same_deletion_twice_keeps_one() {
        let mut completer = PendingFileCompleter::new();
        assert!(completer.add_deletion(PendingDeletion::new("/data/a")));
        assert!(!completer.add_deletion(PendingDeletion::new("/data/a")));
        assert_eq!(completer.pending_deletions(), 1);

        assert!(completer.remove_deletion(&PendingDeletion::new("/data/a")));
        assert!(!completer.remove_deletion(&PendingDeletion::new("/data/a")));
        assert!(completer.is_empty());
    }

    #[test]
    fn renaming_supersedes_staged_deletion() {
        let mut completer = PendingFileCompleter::new();
        completer.add_deletion(PendingDeletion::new("/data/a"));
        assert!(completer.add_renaming(PendingRenaming::new("/data/a.pending", "/data/a")));
        assert_eq!(completer.pending_deletions(), 0);
        assert_eq!(completer.pending_renamings(), 1);

        // And a later deletion of the same target is refused.
        assert!(!completer.add_deletion(PendingDeletion::new("/data/a")));
        assert_eq!(completer.pending_deletions(), 0);
    }

    #[test]
    fn dot_segments_do_not_evade_renaming_targets() {
        let mut completer = PendingFileCompleter::new();
        assert!(completer.add_deletion(PendingDeletion::new("/data/x/../a")));
        assert!(!completer.add_deletion(PendingDeletion::new("/data/./a")));
        assert_eq!(completer.pending_deletions(), 1);

        completer.add_renaming(PendingRenaming::new("/data/a.pending", "/data/a"));
        assert_eq!(completer.pending_deletions(), 0);
        assert!(!completer.add_deletion(PendingDeletion::new("/data/y/../a")));
        assert_eq!(
            PendingDeletion::new("/data/x/../a").absolute_path(),
            Path::new("/data/a")
        );
    }

    #[test]
    fn relative_paths_are_made_absolute() {
        let deletion = PendingDeletion::new("relative/file");
        assert!(deletion.absolute_path().is_absolute());
        assert!(deletion.absolute_path().ends_with("relative/file"));
    }

    #[test]
    fn empty_completer_completes_nothing() {
        let mut completer = PendingFileCompleter::new();
        assert_eq!(completer.complete().unwrap(), 0);
    }
}
