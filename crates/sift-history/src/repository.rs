use std::path::Path;

use crate::error::HistoryError;
use crate::model::History;

/// A version-control backend the history cache reads from.
///
/// The cache never mutates a repository; it only derives cache files from the
/// histories it returns. Capability flags default to the most conservative
/// behavior.
pub trait Repository: Send + Sync {
    /// Absolute path of the repository root (inside the source root).
    fn directory(&self) -> &Path;

    /// Complete history of `file` (a file or directory inside the repository).
    ///
    /// Return [`HistoryError::Unsupported`] when the backend has no history
    /// for the file.
    fn history(&self, file: &Path) -> Result<History, HistoryError>;

    /// History of `file` up to and including `till_revision`.
    ///
    /// Only called when [`Repository::supports_per_partes`] is `true`.
    fn history_until(&self, file: &Path, till_revision: &str) -> Result<History, HistoryError> {
        let _ = (file, till_revision);
        Err(HistoryError::PerPartesUnsupported {
            repository: self.directory().to_path_buf(),
        })
    }

    fn supports_per_partes(&self) -> bool {
        false
    }

    fn is_history_enabled(&self) -> bool {
        true
    }

    fn has_history_for_directories(&self) -> bool {
        false
    }

    /// Re-derive complete histories for files renamed within a stored window.
    fn handle_renamed_files(&self) -> bool {
        false
    }

    fn has_file_based_tags(&self) -> bool {
        false
    }

    /// Assign tags to the entries of `history`.
    fn assign_tags(&self, history: &mut History) {
        let _ = history;
    }
}
