use std::fmt;

use serde::de::DeserializeOwned;

/// Findings that do not stop a config from loading: keys nothing reads and
/// values that are accepted but probably unintended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiagnostics {
    /// Dotted paths of ignored keys, e.g. `history.fetch_when_not_cachd`.
    pub unknown_keys: Vec<String>,
    pub warnings: Vec<ConfigWarning>,
}

impl ConfigDiagnostics {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unknown_keys.is_empty() && self.warnings.is_empty()
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    InvalidValue { toml_path: String, message: String },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::InvalidValue { toml_path, message } => {
                write!(f, "{toml_path}: {message}")
            }
        }
    }
}

/// Deserialize `text`, returning the sorted set of keys the target type ignored.
pub(crate) fn deserialize_toml_with_unknown_keys<T: DeserializeOwned>(
    text: &str,
) -> Result<(T, Vec<String>), toml::de::Error> {
    let mut ignored = Vec::new();
    let value = serde_ignored::deserialize(toml::de::Deserializer::new(text), |path| {
        ignored.push(toml_path(&path.to_string()));
    })?;
    ignored.sort();
    ignored.dedup();
    Ok((value, ignored))
}

/// `serde_ignored` paths look like `.history.0.name`; render them as
/// `history[0].name`.
fn toml_path(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for segment in raw.split('.').filter(|s| !s.is_empty()) {
        if !out.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            out.push_str(&format!("[{segment}]"));
            continue;
        }
        if !out.is_empty() {
            out.push('.');
        }
        out.push_str(segment);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Outer {
        history: Inner,
    }

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Inner {
        tags_enabled: bool,
    }

    #[test]
    fn ignored_nested_keys_are_reported_with_their_table() {
        let text = "[history]\ntags_enabled = true\ntags_enabeld = false\n";
        let (_outer, unknown) = deserialize_toml_with_unknown_keys::<Outer>(text).unwrap();
        assert_eq!(unknown, vec!["history.tags_enabeld"]);
    }

    #[test]
    fn sequence_indices_render_in_brackets() {
        assert_eq!(toml_path(".history.ignored.3.name"), "history.ignored[3].name");
        assert_eq!(toml_path("data_rot"), "data_rot");
    }

    #[test]
    fn warnings_display_their_path() {
        let warning = ConfigWarning::InvalidValue {
            toml_path: "data_root".to_owned(),
            message: "data_root is inside source_root".to_owned(),
        };
        assert_eq!(warning.to_string(), "data_root: data_root is inside source_root");
    }
}
