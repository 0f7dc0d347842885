use std::path::PathBuf;
use std::time::Duration;

use sift_config::{HistoryConfig, SiftConfig};

/// Policy inputs of a [`crate::FileHistoryCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryCacheSettings {
    pub source_root: PathBuf,
    pub data_root: PathBuf,
    pub fetch_history_when_not_cached: bool,
    /// Fetches slower than this are written back to the cache.
    pub history_reader_time_limit: Duration,
    /// Worker threads for renamed-file processing.
    pub renamed_parallelism: usize,
    pub tags_enabled: bool,
}

impl HistoryCacheSettings {
    pub fn new(source_root: impl Into<PathBuf>, data_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            data_root: data_root.into(),
            fetch_history_when_not_cached: true,
            history_reader_time_limit: Duration::from_millis(30),
            renamed_parallelism: HistoryConfig::default().effective_renamed_parallelism(),
            tags_enabled: false,
        }
    }

    pub fn from_config(config: &SiftConfig) -> Self {
        Self {
            source_root: config.source_root.clone(),
            data_root: config.data_root.clone(),
            fetch_history_when_not_cached: config.history.fetch_when_not_cached,
            history_reader_time_limit: config.history.reader_time_limit(),
            renamed_parallelism: config.history.effective_renamed_parallelism(),
            tags_enabled: config.history.tags_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_and_config_parallelism_agree() {
        let config = SiftConfig {
            source_root: "/src".into(),
            data_root: "/data".into(),
            ..SiftConfig::default()
        };
        let from_config = HistoryCacheSettings::from_config(&config);
        let defaults = HistoryCacheSettings::new("/src", "/data");

        assert!(defaults.renamed_parallelism >= 1);
        assert_eq!(defaults.renamed_parallelism, from_config.renamed_parallelism);
        assert_eq!(defaults, from_config);
    }
}
