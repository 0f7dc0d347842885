use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Storage(#[from] sift_storage::StorageError),

    #[error(transparent)]
    Path(#[from] sift_core::PathError),

    #[error("unable to create cache directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache file {path} still exists after removal: {source}")]
    CacheFileExists {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to move history cache into place at {path}: {source}")]
    Rename {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The repository has no history for this file (for example an untracked file).
    #[error("no history available for {path}")]
    Unsupported { path: PathBuf },

    #[error("repository {repository} cannot produce history up to a given revision")]
    PerPartesUnsupported { repository: PathBuf },

    /// Some renamed files of a bulk store could not be cached; the
    /// latest-revision marker was left untouched.
    #[error("failed to store history of {failures} of {total} renamed files in {repository}")]
    RenamedFiles {
        repository: PathBuf,
        failures: usize,
        total: usize,
        /// First failure encountered.
        #[source]
        source: Box<HistoryError>,
    },

    #[error("repository error: {0}")]
    Repository(String),

    #[error("invalid ignored-name pattern: {0}")]
    IgnoredPattern(String),
}
