//! Core shared types for Sift.
//!
//! This crate is intentionally small: it holds the version constant recorded in
//! persisted artifacts and the path helpers shared by the history cache and the
//! pending-file completer.

mod path;

pub use path::{
    cmp_deepest_first, count_path_segments, normalize_lexically, relative_to_root, tandem_join,
    to_slash_path, PathError,
};

/// Sift version string, recorded in persisted artifact headers.
pub const SIFT_VERSION: &str = env!("CARGO_PKG_VERSION");
