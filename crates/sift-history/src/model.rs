use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

/// Schema version of the persisted [`History`] payload.
///
/// Bump whenever the serialized shape of `History`/`HistoryEntry` changes;
/// older cache files then decode as a miss.
pub const HISTORY_SCHEMA_VERSION: u32 = 1;

/// One revision of a file or repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub revision: String,
    pub author: String,
    /// Commit time in milliseconds since the Unix epoch.
    pub date_millis: i64,
    pub message: String,
    pub active: bool,
    pub tags: BTreeSet<String>,
    /// Files touched by the revision, as `/`-separated paths relative to the
    /// source root.
    pub files: BTreeSet<String>,
}

impl HistoryEntry {
    pub fn new(
        revision: impl Into<String>,
        author: impl Into<String>,
        date_millis: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            revision: revision.into(),
            author: author.into(),
            date_millis,
            message: message.into(),
            active: true,
            tags: BTreeSet::new(),
            files: BTreeSet::new(),
        }
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }
}

/// Revision history, newest entry first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    entries: Vec<HistoryEntry>,
    /// Repository-relative paths that were renamed within this history window.
    renamed_files: BTreeSet<String>,
}

impl History {
    pub fn new(entries: Vec<HistoryEntry>) -> Self {
        Self {
            entries,
            renamed_files: BTreeSet::new(),
        }
    }

    pub fn with_renamed_files<I, S>(mut self, renamed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.renamed_files
            .extend(renamed.into_iter().map(Into::into));
        self
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [HistoryEntry] {
        &mut self.entries
    }

    pub fn into_entries(self) -> Vec<HistoryEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Revision of the newest entry.
    pub fn latest_revision(&self) -> Option<&str> {
        self.entries.first().map(|e| e.revision.as_str())
    }

    pub fn renamed_files(&self) -> &BTreeSet<String> {
        &self.renamed_files
    }

    pub fn is_renamed(&self, repo_relative: &str) -> bool {
        self.renamed_files.contains(repo_relative)
    }

    pub fn contains_revision(&self, revision: &str) -> bool {
        self.entries.iter().any(|e| e.revision == revision)
    }

    /// Drop per-entry file lists and the renamed set.
    ///
    /// Per-file caches are keyed by the file itself, so these are redundant there.
    pub fn strip(&mut self) {
        for entry in &mut self.entries {
            entry.files.clear();
        }
        self.renamed_files.clear();
    }

    pub fn clear_tags(&mut self) {
        for entry in &mut self.entries {
            entry.tags.clear();
        }
    }

    /// Prepend the entries of `newer` that are not present yet, keeping
    /// their newest-first order.
    pub(crate) fn merge_newer(&mut self, newer: History) {
        let cached: HashSet<&str> = self.entries.iter().map(|e| e.revision.as_str()).collect();
        let mut merged: Vec<HistoryEntry> = newer
            .entries
            .into_iter()
            .filter(|e| !cached.contains(e.revision.as_str()))
            .collect();
        if merged.is_empty() {
            return;
        }
        merged.append(&mut self.entries);
        self.entries = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(rev: &str) -> HistoryEntry {
        HistoryEntry::new(rev, "alice", 0, format!("commit {rev}"))
    }

    #[test]
    fn merge_prepends_only_unseen_revisions() {
        let mut old = History::new(vec![entry("2"), entry("1")]);
        old.merge_newer(History::new(vec![entry("4"), entry("3"), entry("2")]));

        let revisions: Vec<_> = old.entries().iter().map(|e| e.revision.as_str()).collect();
        assert_eq!(revisions, ["4", "3", "2", "1"]);
    }

    #[test]
    fn merge_of_already_cached_window_is_a_no_op() {
        let cached: Vec<_> = (0..500).rev().map(|i| entry(&i.to_string())).collect();
        let mut old = History::new(cached.clone());
        old.merge_newer(History::new(cached[..200].to_vec()));
        assert_eq!(old.entries(), cached.as_slice());
    }

    #[test]
    fn strip_clears_files_and_renames() {
        let mut history = History::new(vec![entry("1").with_files(["/r/a.c"])])
            .with_renamed_files(["a.c"]);
        assert!(history.is_renamed("a.c"));

        history.strip();
        assert!(history.entries()[0].files.is_empty());
        assert!(history.renamed_files().is_empty());
        assert_eq!(history.latest_revision(), Some("1"));
    }
}
