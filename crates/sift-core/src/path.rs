use std::cmp::Ordering;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("path {path} is not under root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("failed to resolve {path}: {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Returns `path` relative to `root`.
///
/// A purely lexical prefix match is tried first; any symlink met while
/// walking the remainder must resolve inside the root. When the lexical match
/// fails (or would escape the root through `..`), both paths are canonicalized
/// so that a symlinked root still resolves. Paths that leave the root through
/// a symlink are rejected with [`PathError::OutsideRoot`].
pub fn relative_to_root(root: &Path, path: &Path) -> Result<PathBuf, PathError> {
    if let Ok(rel) = path.strip_prefix(root) {
        if !rel.components().any(|c| matches!(c, Component::ParentDir)) {
            check_symlinks_stay_in_root(root, rel, path)?;
            return Ok(rel.to_path_buf());
        }
    }

    let canonical_root = canonicalize(root)?;
    let canonical_path = canonicalize(path)?;

    canonical_path
        .strip_prefix(&canonical_root)
        .map(Path::to_path_buf)
        .map_err(|_| PathError::OutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })
}

fn canonicalize(path: &Path) -> Result<PathBuf, PathError> {
    dunce::canonicalize(path).map_err(|source| PathError::Resolve {
        path: path.to_path_buf(),
        source,
    })
}

/// Walk `root/rel` one component at a time and resolve every symlink on the
/// way. Components that do not exist (yet) end the walk.
fn check_symlinks_stay_in_root(root: &Path, rel: &Path, path: &Path) -> Result<(), PathError> {
    let mut current = root.to_path_buf();
    for component in rel.components() {
        current.push(component);
        match std::fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {}
            Ok(_) => continue,
            Err(_) => break,
        }

        let target = canonicalize(&current)?;
        if !target.starts_with(canonicalize(root)?) {
            return Err(PathError::OutsideRoot {
                path: path.to_path_buf(),
                root: root.to_path_buf(),
            });
        }
    }
    Ok(())
}

/// Resolves `.` and `..` components without touching the filesystem.
///
/// `..` directly below the root is dropped; leading `..` of a relative path
/// is kept.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Renders a relative path with `/` separators, dropping `.` components.
pub fn to_slash_path(rel: &Path) -> String {
    let mut out = String::new();
    for component in rel.components() {
        if let Component::Normal(part) = component {
            if !out.is_empty() {
                out.push('/');
            }
            out.push_str(&part.to_string_lossy());
        }
    }
    out
}

/// Appends `suffix` to the final component of `path`.
///
/// `tandem_join("a/foo", ".zst")` is `a/foo.zst`, a sibling of the (possible)
/// directory `a/foo` rather than an entry inside it.
pub fn tandem_join(path: &Path, suffix: &str) -> PathBuf {
    match path.file_name() {
        Some(name) => {
            let mut name = name.to_os_string();
            name.push(suffix);
            path.with_file_name(name)
        }
        None => {
            let mut raw: OsString = path.as_os_str().to_os_string();
            raw.push(suffix);
            PathBuf::from(raw)
        }
    }
}

/// Counts path segments delimited by `/` or `\`.
pub fn count_path_segments(path: &Path) -> usize {
    path.as_os_str()
        .to_string_lossy()
        .chars()
        .filter(|&c| c == '/' || c == '\\')
        .count()
        + 1
}

/// Total order placing deeper paths first, ties broken lexicographically.
pub fn cmp_deepest_first(a: &Path, b: &Path) -> Ordering {
    count_path_segments(b)
        .cmp(&count_path_segments(a))
        .then_with(|| a.as_os_str().cmp(b.as_os_str()))
}
