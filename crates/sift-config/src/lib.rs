//! Configuration for Sift (`sift.toml`) and the tracing subscriber setup.
//!
//! The history cache consumes a small set of policy inputs from here: the
//! source and data roots, the "fetch history when not cached" flag, the
//! cache-warming time threshold and the renamed-file worker pool size.

mod diagnostics;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use diagnostics::{ConfigDiagnostics, ConfigWarning};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    /// Root of the indexed source tree.
    pub source_root: PathBuf,
    /// Root under which caches (`historycache/`, ...) are written.
    pub data_root: PathBuf,
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Fetch history from the repository when a file has no cache entry.
    ///
    /// When disabled, and history indexing is complete for repositories that
    /// support directory history, a cache miss means "no history".
    pub fetch_when_not_cached: bool,

    /// Fetches slower than this are written back to the cache even if the
    /// file had no cache entry before.
    pub reader_time_limit_ms: u64,

    /// Worker threads used to re-derive history for renamed files.
    /// `0` means "number of available CPUs".
    pub renamed_parallelism: usize,

    /// Assign tags to history entries.
    pub tags_enabled: bool,

    /// Glob patterns; files whose name (or any path component) matches are
    /// never cached.
    pub ignored_names: Vec<String>,
}

impl HistoryConfig {
    pub fn reader_time_limit(&self) -> Duration {
        Duration::from_millis(self.reader_time_limit_ms)
    }

    pub fn effective_renamed_parallelism(&self) -> usize {
        if self.renamed_parallelism > 0 {
            return self.renamed_parallelism;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            fetch_when_not_cached: true,
            reader_time_limit_ms: 30,
            renamed_parallelism: 0,
            tags_enabled: false,
            ignored_names: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level for all Sift crates, or a full `EnvFilter` directive string.
    pub level: String,

    /// Emit logs in JSON format.
    pub json: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// Create the effective `EnvFilter` for Sift tracing.
    ///
    /// If `RUST_LOG` is set, it is merged into the resulting filter.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn sanitize_toml_error_message(message: &str) -> String {
    // `toml::de::Error::message()` can include user-provided scalar values, e.g.
    // `invalid type: string "/secret/path", expected a boolean`.
    static QUOTED_STRING_RE: OnceLock<regex::Regex> = OnceLock::new();

    let re = QUOTED_STRING_RE.get_or_init(|| {
        regex::Regex::new(r#""(?:\\.|[^"\\])*""#).expect("quoted-string regex should compile")
    });
    re.replace_all(message, r#""<redacted>""#).into_owned()
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` includes a source snippet; keep just the message.
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

impl SiftConfig {
    /// Load and validate a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_from_path_with_diagnostics(path).map(|(config, _)| config)
    }

    /// Like [`SiftConfig::load_from_path`], also returning diagnostics.
    pub fn load_from_path_with_diagnostics(
        path: impl AsRef<Path>,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::load_from_str_with_diagnostics(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Self::load_from_str_with_diagnostics(text).map(|(config, _)| config)
    }

    pub fn load_from_str_with_diagnostics(
        text: &str,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let (config, unknown_keys) =
            diagnostics::deserialize_toml_with_unknown_keys::<SiftConfig>(text)?;
        config.validate()?;

        let mut diagnostics = ConfigDiagnostics {
            unknown_keys,
            ..ConfigDiagnostics::default()
        };
        diagnostics.warnings.extend(config.warnings());

        for key in &diagnostics.unknown_keys {
            tracing::warn!(target: "sift.config", key = %key, "ignoring unknown config key");
        }

        Ok((config, diagnostics))
    }

    /// Reject configs the history cache cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("source_root must be set".to_owned()));
        }
        if self.data_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_root must be set".to_owned()));
        }
        for (idx, pattern) in self.history.ignored_names.iter().enumerate() {
            if let Err(err) = globset::Glob::new(pattern) {
                return Err(ConfigError::Invalid(format!(
                    "history.ignored_names[{idx}] is not a valid glob: {}",
                    err.kind()
                )));
            }
        }
        Ok(())
    }

    fn warnings(&self) -> Vec<ConfigWarning> {
        let mut out = Vec::new();
        if self.history.reader_time_limit_ms == 0 {
            out.push(ConfigWarning::InvalidValue {
                toml_path: "history.reader_time_limit_ms".to_owned(),
                message: "0 writes every fetched history back to the cache".to_owned(),
            });
        }
        if self.data_root.starts_with(&self.source_root) {
            out.push(ConfigWarning::InvalidValue {
                toml_path: "data_root".to_owned(),
                message: "data_root is inside source_root".to_owned(),
            });
        }
        out
    }
}

/// Install a global `tracing` subscriber writing to stderr.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = config.env_filter();
    let result = if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init()
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_synonyms_are_normalized() {
        assert_eq!(LoggingConfig::normalize_level_directives(" WARNING "), "warn");
        assert_eq!(LoggingConfig::normalize_level_directives(""), "info");
        assert_eq!(
            LoggingConfig::normalize_level_directives("sift.history=debug"),
            "sift.history=debug"
        );
    }

    #[test]
    fn toml_errors_do_not_leak_string_values() {
        let err = SiftConfig::load_from_str(
            r#"
source_root = "/src"
data_root = "/data"
[history]
tags_enabled = "super-secret"
"#,
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(!message.contains("super-secret"), "{message}");
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn zero_parallelism_means_available_cpus() {
        let config = HistoryConfig::default();
        assert!(config.effective_renamed_parallelism() >= 1);

        let config = HistoryConfig {
            renamed_parallelism: 3,
            ..HistoryConfig::default()
        };
        assert_eq!(config.effective_renamed_parallelism(), 3);
    }
}
