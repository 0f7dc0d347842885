//! Detection of "fileless" directory skeletons left behind after deletions.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sift_core::cmp_deepest_first;

/// Result of scanning one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkeletonScan {
    /// No file exists anywhere below the directory.
    pub is_fileless: bool,
    /// Descendant directories that are themselves fileless, in discovery order.
    pub candidate_dirs: Vec<PathBuf>,
}

/// Scan `dir` bottom-up for fileless descendant directories.
///
/// A missing directory is fileless. Anything that is not a plain directory
/// (files, symlinks) or cannot be read makes its directory non-fileless.
/// Fileless directories nested below a non-fileless one are still reported.
pub fn scan_fileless(dir: &Path) -> SkeletonScan {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return SkeletonScan {
                is_fileless: true,
                candidate_dirs: Vec::new(),
            };
        }
        Err(err) => {
            tracing::trace!(
                target = "sift.index",
                path = %dir.display(),
                error = %err,
                "failed to read directory"
            );
            return SkeletonScan::default();
        }
    };

    let mut scan = SkeletonScan {
        is_fileless: true,
        candidate_dirs: Vec::new(),
    };
    for entry in entries {
        let Ok(entry) = entry else {
            scan.is_fileless = false;
            continue;
        };
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let path = entry.path();
        if !is_dir {
            if scan.is_fileless {
                tracing::trace!(
                    target = "sift.index",
                    path = %path.display(),
                    "directory is not fileless"
                );
            }
            scan.is_fileless = false;
            continue;
        }

        let child = scan_fileless(&path);
        scan.candidate_dirs.extend(child.candidate_dirs);
        if child.is_fileless {
            scan.candidate_dirs.push(path);
        } else {
            scan.is_fileless = false;
        }
    }
    scan
}

/// Fileless descendants of `dir`, deepest first.
pub fn fileless_children(dir: &Path) -> Vec<PathBuf> {
    let mut dirs = scan_fileless(dir).candidate_dirs;
    dirs.sort_by(|a, b| cmp_deepest_first(a, b));
    dirs.dedup();
    dirs
}
