use std::path::{Component, Path};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::HistoryError;

/// Decides whether a source file takes part in history caching.
pub trait PathAccepter: Send + Sync {
    fn accept(&self, path: &Path) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl PathAccepter for AcceptAll {
    fn accept(&self, _path: &Path) -> bool {
        true
    }
}

/// Rejects paths where any component matches one of the ignored-name globs
/// (for example `*.orig` or `.git`).
#[derive(Debug, Clone)]
pub struct GlobPathAccepter {
    ignored: GlobSet,
}

impl GlobPathAccepter {
    pub fn new<I, S>(patterns: I) -> Result<Self, HistoryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = Glob::new(pattern)
                .map_err(|err| HistoryError::IgnoredPattern(format!("{pattern}: {}", err.kind())))?;
            builder.add(glob);
        }
        let ignored = builder
            .build()
            .map_err(|err| HistoryError::IgnoredPattern(err.to_string()))?;
        Ok(Self { ignored })
    }
}

impl PathAccepter for GlobPathAccepter {
    fn accept(&self, path: &Path) -> bool {
        let rejected = path.components().any(|component| match component {
            Component::Normal(name) => self.ignored.is_match(name),
            _ => false,
        });
        if rejected {
            tracing::trace!(
                target = "sift.history",
                path = %path.display(),
                "path rejected by ignored-name pattern"
            );
        }
        !rejected
    }
}
