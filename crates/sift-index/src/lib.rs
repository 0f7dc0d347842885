//! Deferred, crash-consistent filesystem mutations for an indexing pass.
//!
//! An indexer stages obsolete artifacts for deletion and freshly written
//! transient files for renaming on a [`PendingFileCompleter`], then applies
//! everything at the end of the pass with [`PendingFileCompleter::complete`]:
//! deletions first (in parallel, followed by removal of emptied directory
//! skeletons), then renamings.

mod completer;
mod error;
pub mod skeleton;

pub use completer::{PendingDeletion, PendingFileCompleter, PendingRenaming, PENDING_EXTENSION};
pub use error::{CompleteError, Stage};
pub use skeleton::{fileless_children, scan_fileless, SkeletonScan};
