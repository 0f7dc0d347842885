use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use sift_config::SiftConfig;
use sift_core::{relative_to_root, tandem_join, to_slash_path};
use sift_metrics::MetricsRegistry;
use sift_storage::{ArtifactKind, Compression};

use crate::accept::{GlobPathAccepter, PathAccepter};
use crate::error::HistoryError;
use crate::lock::CacheLock;
use crate::model::{History, HistoryEntry, HISTORY_SCHEMA_VERSION};
use crate::pool::RenamedFilesPool;
use crate::repository::Repository;
use crate::settings::HistoryCacheSettings;

/// Directory under the data root holding all per-file history caches.
pub const HISTORY_CACHE_DIR_NAME: &str = "historycache";
/// Per-repository marker holding the newest fully cached revision.
pub const LATEST_REV_FILE_NAME: &str = "OpenGroklatestRev";
/// Appended to the final component of a mirrored source path.
pub const CACHE_FILE_SUFFIX: &str = ".zst";

const LOCK_FILE_NAME: &str = "historycache.lock";

const METRIC_GET_HITS: &str = "filehistorycache.history.get.hits";
const METRIC_GET_MISSES: &str = "filehistorycache.history.get.misses";
const METRIC_FETCH_LATENCY: &str = "filehistorycache.history.fetch";

/// Per-file history cache mirroring the source tree under
/// `<data_root>/historycache`.
///
/// Cache files are written to a temporary sibling first and moved into place
/// under [`CacheLock`], so readers only ever see complete files.
pub struct FileHistoryCache {
    settings: HistoryCacheSettings,
    accepter: Arc<dyn PathAccepter>,
    metrics: Option<Arc<MetricsRegistry>>,
    pool: RenamedFilesPool,
    history_index_done: AtomicBool,
}

impl std::fmt::Debug for FileHistoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHistoryCache")
            .field("settings", &self.settings)
            .field("renamed_threads", &self.pool.threads())
            .field("metrics", &self.metrics.is_some())
            .field("history_index_done", &self.is_history_index_done())
            .finish_non_exhaustive()
    }
}

impl FileHistoryCache {
    pub fn new(
        settings: HistoryCacheSettings,
        accepter: Arc<dyn PathAccepter>,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Result<Self, HistoryError> {
        let cache_root = settings.data_root.join(HISTORY_CACHE_DIR_NAME);
        fs::create_dir_all(&cache_root).map_err(|source| HistoryError::CreateDir {
            path: cache_root.clone(),
            source,
        })?;

        let pool = RenamedFilesPool::new(settings.renamed_parallelism);
        tracing::debug!(
            target = "sift.history",
            cache_root = %cache_root.display(),
            renamed_threads = pool.threads(),
            "initialized file history cache"
        );

        Ok(Self {
            settings,
            accepter,
            metrics,
            pool,
            history_index_done: AtomicBool::new(false),
        })
    }

    /// Build a cache from a loaded config, rejecting files that match
    /// `history.ignored_names`.
    pub fn from_config(
        config: &SiftConfig,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Result<Self, HistoryError> {
        let accepter = GlobPathAccepter::new(&config.history.ignored_names)?;
        Self::new(
            HistoryCacheSettings::from_config(config),
            Arc::new(accepter),
            metrics,
        )
    }

    pub fn settings(&self) -> &HistoryCacheSettings {
        &self.settings
    }

    pub fn info(&self) -> String {
        format!(
            "file-based history cache (schema {HISTORY_SCHEMA_VERSION}, zstd) at {}",
            self.cache_root().display()
        )
    }

    pub fn cache_root(&self) -> PathBuf {
        self.settings.data_root.join(HISTORY_CACHE_DIR_NAME)
    }

    fn lock_path(&self) -> PathBuf {
        self.settings.data_root.join(LOCK_FILE_NAME)
    }

    /// Mark history indexing as complete for the whole corpus.
    pub fn set_history_index_done(&self) {
        self.history_index_done.store(true, Ordering::Release);
    }

    pub fn is_history_index_done(&self) -> bool {
        self.history_index_done.load(Ordering::Acquire)
    }

    /// Location of the cache file for `file`.
    ///
    /// `None` for the source root itself and for paths that resolve outside
    /// of it.
    pub fn cache_path_for(&self, file: &Path) -> Option<PathBuf> {
        self.source_relative(file)
            .and_then(|rel| self.cache_path_for_relative(&rel))
    }

    fn cache_path_for_relative(&self, rel: &Path) -> Option<PathBuf> {
        if rel.as_os_str().is_empty() {
            return None;
        }
        Some(tandem_join(&self.cache_root().join(rel), CACHE_FILE_SUFFIX))
    }

    /// `file` relative to the source root, or `None` (logged) when it lies
    /// outside of it, possibly through a symlink.
    fn source_relative(&self, file: &Path) -> Option<PathBuf> {
        match relative_to_root(&self.settings.source_root, file) {
            Ok(rel) => Some(rel),
            Err(err) => {
                tracing::debug!(
                    target = "sift.history",
                    path = %file.display(),
                    error = %err,
                    "skipping file outside of source root"
                );
                None
            }
        }
    }

    pub fn has_cache_for_file(&self, file: &Path) -> bool {
        self.cache_path_for(file).is_some_and(|path| path.is_file())
    }

    /// `<data_root>/historycache/<repository path relative to source root>`.
    pub fn repository_history_dir(
        &self,
        repository: &dyn Repository,
    ) -> Result<PathBuf, HistoryError> {
        let rel = relative_to_root(&self.settings.source_root, repository.directory())?;
        Ok(self.cache_root().join(rel))
    }

    /// History of `file`, from the cache when it is up to date, otherwise
    /// fetched from `repository`.
    ///
    /// Unreadable cache files count as a miss. Returns `Ok(None)` when the
    /// file lies outside the source root, when the repository has no history
    /// for it, when it is rejected by the path accepter, or when fetching on a
    /// miss is disabled by policy.
    pub fn get(
        &self,
        file: &Path,
        repository: &dyn Repository,
        with_files: bool,
    ) -> Result<Option<History>, HistoryError> {
        let Some(rel) = self.source_relative(file) else {
            return Ok(None);
        };
        let cache_path = self.cache_path_for_relative(&rel);

        if let Some(cache_path) = cache_path.as_deref() {
            if is_up_to_date(file, cache_path) {
                match self.read_cache(cache_path) {
                    Ok(history) => {
                        self.count(METRIC_GET_HITS);
                        return Ok(Some(history));
                    }
                    Err(err) => {
                        tracing::warn!(
                            target = "sift.history",
                            path = %cache_path.display(),
                            error = %err,
                            "failed to read history cache file"
                        );
                    }
                }
            }
        }

        self.count(METRIC_GET_MISSES);

        // Repositories with directory history had all their files cached during
        // indexing; a miss there almost always means an untracked file.
        if self.is_history_index_done()
            && repository.is_history_enabled()
            && repository.has_history_for_directories()
            && !self.settings.fetch_history_when_not_cached
        {
            return Ok(None);
        }

        if !self.accepter.accept(file) {
            return Ok(None);
        }

        let started = Instant::now();
        let history = match repository.history(file) {
            Ok(history) => history,
            Err(HistoryError::Unsupported { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };
        let elapsed = started.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.record_latency(METRIC_FETCH_LATENCY, elapsed);
        }

        let mut stripped = history.clone();
        stripped.strip();

        // Directory history goes stale whenever a descendant changes; never cache it.
        if !file.is_dir() {
            if let Some(cache_path) = cache_path.as_deref() {
                if cache_path.exists() || elapsed > self.settings.history_reader_time_limit {
                    tracing::debug!(
                        target = "sift.history",
                        path = %file.display(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "writing fetched history to cache"
                    );
                    if let Err(err) = self.store_file(stripped.clone(), file, repository, true) {
                        tracing::warn!(
                            target = "sift.history",
                            path = %file.display(),
                            error = %err,
                            "failed to cache fetched history"
                        );
                    }
                }
            }
        }

        Ok(Some(if with_files { history } else { stripped }))
    }

    /// Store the history of a whole repository as per-file caches, then record
    /// its newest revision as the latest cached revision.
    ///
    /// Per-file caches are overwritten, not merged. Files renamed within the
    /// window get their complete history re-derived on the renamed-files pool
    /// (up to `till_revision` when given). If any of them fails, the other
    /// renamed files still complete but the marker is not updated.
    pub fn store(
        &self,
        history: &History,
        repository: &dyn Repository,
        till_revision: Option<&str>,
    ) -> Result<(), HistoryError> {
        let Some(latest_revision) = history.latest_revision() else {
            return Ok(());
        };
        let handle_renamed = repository.handle_renamed_files();

        let mut by_file: BTreeMap<String, Vec<HistoryEntry>> = BTreeMap::new();
        let mut acceptance: HashMap<PathBuf, bool> = HashMap::new();
        for entry in history.entries() {
            for file in &entry.files {
                let rel = file.trim_start_matches('/');
                let path = self.settings.source_root.join(rel);
                let accepted = *acceptance
                    .entry(path.clone())
                    .or_insert_with(|| path.exists() && self.accepter.accept(&path));
                if !accepted {
                    continue;
                }
                by_file.entry(rel.to_owned()).or_default().push(entry.clone());
            }
        }

        let hist_dir = self.repository_history_dir(repository)?;
        fs::create_dir_all(&hist_dir).map_err(|source| HistoryError::CreateDir {
            path: hist_dir.clone(),
            source,
        })?;

        let repo_rel = to_slash_path(&relative_to_root(
            &self.settings.source_root,
            repository.directory(),
        )?);

        let mut renamed = Vec::new();
        let mut stored = 0usize;
        for (file, entries) in by_file {
            if handle_renamed && history.is_renamed(repository_relative(&file, &repo_rel)) {
                renamed.push(file);
                continue;
            }
            self.do_file_history(&file, History::new(entries), repository)?;
            stored += 1;
        }

        tracing::debug!(
            target = "sift.history",
            repository = %repository.directory().display(),
            files = stored,
            renamed = renamed.len(),
            "stored per-file history"
        );

        if handle_renamed {
            self.store_renamed(&renamed, repository, till_revision)?;
        }

        self.finish_store(repository, latest_revision)
    }

    /// Write the history of a single file to its cache file.
    ///
    /// With `merge`, entries of `history` not yet cached are prepended to the
    /// cached history (and tags recomputed when enabled). An unreadable old
    /// cache is replaced by `history`.
    pub fn store_file(
        &self,
        history: History,
        file: &Path,
        repository: &dyn Repository,
        merge: bool,
    ) -> Result<(), HistoryError> {
        let Some(cache_path) = self.cache_path_for(file) else {
            return Ok(());
        };

        if let Some(dir) = cache_path.parent() {
            if !dir.is_dir() {
                fs::create_dir_all(dir).map_err(|source| HistoryError::CreateDir {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
        }

        let history = if merge && cache_path.exists() {
            self.merge_with_cached(&cache_path, history, repository)
        } else {
            history
        };

        self.write_history(&cache_path, &history)
    }

    /// Newest revision fully committed to the cache for `repository`.
    pub fn latest_cached_revision(&self, repository: &dyn Repository) -> Option<String> {
        let path = self
            .repository_history_dir(repository)
            .ok()?
            .join(LATEST_REV_FILE_NAME);
        match fs::read_to_string(&path) {
            Ok(text) => text
                .lines()
                .next()
                .map(str::trim)
                .filter(|rev| !rev.is_empty())
                .map(str::to_owned),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                tracing::debug!(
                    target = "sift.history",
                    path = %path.display(),
                    error = %err,
                    "failed to read latest cached revision"
                );
                None
            }
        }
    }

    /// Remove all cached history of `repository`, including its marker.
    pub fn clear(&self, repository: &dyn Repository) -> Result<(), HistoryError> {
        let dir = self.repository_history_dir(repository)?;
        sift_storage::remove_file_best_effort(&dir.join(LATEST_REV_FILE_NAME), "clear.latest_rev");

        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(
                    target = "sift.history",
                    path = %dir.display(),
                    "history cache directory does not exist"
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Remove the cache file of `path` (relative to the source root) and its
    /// parent directory if that became empty.
    pub fn clear_file(&self, path: &str) {
        let cache_path = tandem_join(
            &self.cache_root().join(path.trim_start_matches('/')),
            CACHE_FILE_SUFFIX,
        );
        if !sift_storage::remove_file_best_effort(&cache_path, "clear_file") {
            return;
        }

        if let Some(parent) = cache_path.parent() {
            if parent != self.cache_root() {
                if let Err(err) = fs::remove_dir(parent) {
                    tracing::trace!(
                        target = "sift.history",
                        path = %parent.display(),
                        error = %err,
                        "kept history cache directory"
                    );
                }
            }
        }
    }

    fn do_file_history(
        &self,
        rel: &str,
        mut history: History,
        repository: &dyn Repository,
    ) -> Result<(), HistoryError> {
        let path = self.settings.source_root.join(rel);
        if path.is_dir() {
            return Ok(());
        }

        history.strip();
        if self.settings.tags_enabled && repository.has_file_based_tags() {
            repository.assign_tags(&mut history);
        }

        self.store_file(history, &path, repository, false)
    }

    fn do_renamed_file_history(
        &self,
        rel: &str,
        repository: &dyn Repository,
        till_revision: Option<&str>,
    ) -> Result<(), HistoryError> {
        let path = self.settings.source_root.join(rel);
        let history = match till_revision {
            Some(till) => {
                if !repository.supports_per_partes() {
                    return Err(HistoryError::PerPartesUnsupported {
                        repository: repository.directory().to_path_buf(),
                    });
                }
                repository.history_until(&path, till)?
            }
            None => repository.history(&path)?,
        };
        self.do_file_history(rel, history, repository)
    }

    /// Cache the complete history of every renamed file that still exists.
    ///
    /// All files are attempted; the first failure is returned afterwards.
    fn store_renamed(
        &self,
        renamed: &[String],
        repository: &dyn Repository,
        till_revision: Option<&str>,
    ) -> Result<(), HistoryError> {
        let existing: Vec<&String> = renamed
            .iter()
            .filter(|rel| self.settings.source_root.join(rel).exists())
            .collect();
        if existing.is_empty() {
            return Ok(());
        }

        // Create cache directories up front so workers do not race on them.
        for rel in &existing {
            let Some(cache_path) = self.cache_path_for(&self.settings.source_root.join(rel)) else {
                continue;
            };
            if let Some(parent) = cache_path.parent() {
                if let Err(err) = fs::create_dir_all(parent) {
                    tracing::warn!(
                        target = "sift.history",
                        path = %parent.display(),
                        error = %err,
                        "unable to create cache directory"
                    );
                }
            }
        }

        let results = self.pool.run_all(&existing, |rel| {
            self.do_renamed_file_history(rel, repository, till_revision)
                .inspect_err(|err| {
                    tracing::warn!(
                        target = "sift.history",
                        file = %rel,
                        error = %err,
                        "failed to store history of renamed file"
                    );
                })
        });

        let total = results.len();
        let mut failures = 0usize;
        let mut first_error = None;
        for err in results.into_iter().filter_map(Result::err) {
            failures += 1;
            first_error.get_or_insert(err);
        }

        tracing::debug!(
            target = "sift.history",
            repository = %repository.directory().display(),
            stored = total - failures,
            total,
            "stored history of renamed files"
        );

        match first_error {
            Some(source) => Err(HistoryError::RenamedFiles {
                repository: repository.directory().to_path_buf(),
                failures,
                total,
                source: Box::new(source),
            }),
            None => Ok(()),
        }
    }

    fn finish_store(
        &self,
        repository: &dyn Repository,
        latest_revision: &str,
    ) -> Result<(), HistoryError> {
        let hist_dir = self.repository_history_dir(repository)?;
        if !hist_dir.is_dir() {
            tracing::warn!(
                target = "sift.history",
                repository = %repository.directory().display(),
                path = %hist_dir.display(),
                "history cache directory is missing; not recording latest revision"
            );
            return Ok(());
        }

        let marker = hist_dir.join(LATEST_REV_FILE_NAME);
        sift_storage::atomic_write(&marker, format!("{latest_revision}\n").as_bytes())?;
        tracing::debug!(
            target = "sift.history",
            repository = %repository.directory().display(),
            revision = latest_revision,
            "done storing history"
        );
        Ok(())
    }

    fn merge_with_cached(
        &self,
        cache_path: &Path,
        newer: History,
        repository: &dyn Repository,
    ) -> History {
        match self.read_cache(cache_path) {
            Ok(mut merged) if !merged.is_empty() => {
                merged.merge_newer(newer);
                // A new tag may apply to revisions that were cached before it existed.
                if self.settings.tags_enabled && repository.has_file_based_tags() {
                    merged.clear_tags();
                    repository.assign_tags(&mut merged);
                }
                merged
            }
            Ok(_) => newer,
            Err(err) => {
                tracing::warn!(
                    target = "sift.history",
                    path = %cache_path.display(),
                    error = %err,
                    "cannot read history cache file for merge; storing new history only"
                );
                newer
            }
        }
    }

    fn read_cache(&self, cache_path: &Path) -> Result<History, sift_storage::StorageError> {
        sift_storage::read_artifact(cache_path, ArtifactKind::FileHistory, HISTORY_SCHEMA_VERSION)
    }

    fn write_history(&self, cache_path: &Path, history: &History) -> Result<(), HistoryError> {
        let bytes = sift_storage::encode_artifact(
            ArtifactKind::FileHistory,
            HISTORY_SCHEMA_VERSION,
            history,
            Compression::Zstd,
        )?;
        let tmp_path = sift_storage::write_tmp_file(cache_path, &bytes)?;

        let _lock = match CacheLock::lock_exclusive(&self.lock_path()) {
            Ok(lock) => lock,
            Err(err) => {
                sift_storage::remove_file_best_effort(&tmp_path, "write_history.lock_failed");
                return Err(err.into());
            }
        };

        if let Err(err) = fs::remove_file(cache_path) {
            if err.kind() != io::ErrorKind::NotFound && cache_path.exists() {
                sift_storage::remove_file_best_effort(&tmp_path, "write_history.remove_failed");
                return Err(HistoryError::CacheFileExists {
                    path: cache_path.to_path_buf(),
                    source: err,
                });
            }
        }

        if let Err(source) = sift_storage::rename_overwrite(&tmp_path, cache_path) {
            sift_storage::remove_file_best_effort(&tmp_path, "write_history.rename_failed");
            return Err(HistoryError::Rename {
                path: cache_path.to_path_buf(),
                source,
            });
        }

        Ok(())
    }

    fn count(&self, name: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.increment(name);
        }
    }
}

/// The cache is up to date when it exists and the source file was not
/// modified after it. A source without a readable mtime never invalidates.
fn is_up_to_date(file: &Path, cache_path: &Path) -> bool {
    let Ok(cache_modified) = fs::metadata(cache_path).and_then(|m| m.modified()) else {
        return false;
    };
    match fs::metadata(file).and_then(|m| m.modified()) {
        Ok(file_modified) => file_modified <= cache_modified,
        Err(_) => true,
    }
}

fn repository_relative<'a>(file: &'a str, repo_rel: &str) -> &'a str {
    if repo_rel.is_empty() {
        return file;
    }
    file.strip_prefix(repo_rel)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_relative_strips_repo_prefix() {
        assert_eq!(repository_relative("repo/src/a.c", "repo"), "src/a.c");
        assert_eq!(repository_relative("src/a.c", ""), "src/a.c");
        assert_eq!(repository_relative("repository/a.c", "repo"), "repository/a.c");
    }
}
