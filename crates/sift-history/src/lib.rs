//! File-based revision history cache.
//!
//! Histories fetched from a [`Repository`] are split per file and stored as
//! compressed artifacts under `<data_root>/historycache`, mirroring the
//! source tree. Each repository also gets a latest-cached-revision marker
//! used to resume incremental indexing.

mod accept;
mod error;
mod file_cache;
mod lock;
mod model;
mod pool;
mod repository;
mod settings;

pub use accept::{AcceptAll, GlobPathAccepter, PathAccepter};
pub use error::HistoryError;
pub use file_cache::{
    FileHistoryCache, CACHE_FILE_SUFFIX, HISTORY_CACHE_DIR_NAME, LATEST_REV_FILE_NAME,
};
pub use lock::CacheLock;
pub use model::{History, HistoryEntry, HISTORY_SCHEMA_VERSION};
pub use pool::RenamedFilesPool;
pub use repository::Repository;
pub use settings::HistoryCacheSettings;
