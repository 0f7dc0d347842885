//! Versioned, compressed on-disk artifacts for Sift caches.
//!
//! ## Format
//! Each persisted artifact is stored as:
//! - a fixed-size header (64 bytes, little-endian)
//! - a payload holding the `bincode` encoding of the artifact value, optionally
//!   zstd-compressed as a whole
//!
//! The header embeds:
//! - magic bytes and a container format version
//! - the artifact kind and its schema version
//! - compression flag, payload lengths and a content hash of the
//!   uncompressed payload
//! - the Sift version that wrote the artifact (informational)
//!
//! Decoding distinguishes I/O failures from "this is not a valid artifact"
//! (see [`StorageError::is_corrupt`]); caches treat the latter as a miss.

mod codec;
mod error;
mod header;
mod write;

pub use codec::{decode_artifact, encode_artifact, read_artifact, PAYLOAD_LIMIT_BYTES};
pub use error::StorageError;
pub use header::{ArtifactKind, Compression, StorageHeader, HEADER_LEN};
pub use write::{atomic_write, remove_file_best_effort, rename_overwrite, write_tmp_file};
