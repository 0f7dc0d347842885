use crate::header::ArtifactKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),
    #[error("unsupported artifact format version {0}")]
    UnsupportedFormat(u16),
    #[error("unknown artifact kind tag {0}")]
    UnknownArtifact(u16),
    #[error("incompatible artifact kind: expected {expected:?}, found {found:?}")]
    WrongArtifact {
        expected: ArtifactKind,
        found: ArtifactKind,
    },
    #[error("incompatible schema version: expected {expected}, found {found}")]
    WrongSchema { expected: u32, found: u32 },
    #[error("truncated artifact: expected at least {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("unsupported compression tag {0}")]
    UnsupportedCompression(u8),
    #[error("payload size {payload_len} exceeds the artifact size limit")]
    OversizedPayload { payload_len: u64 },
    #[error("decompression failed: {0}")]
    Decompression(String),
    #[error("payload hash mismatch: expected {expected}, found {found}")]
    HashMismatch { expected: u64, found: u64 },
    #[error("failed to encode artifact: {0}")]
    Encode(String),
    #[error("failed to decode artifact payload: {0}")]
    Decode(String),
}

impl StorageError {
    /// Returns `true` when the bytes are not a usable artifact (as opposed to an I/O failure
    /// or an encoding bug on the writer side).
    pub fn is_corrupt(&self) -> bool {
        !matches!(self, StorageError::Io(_) | StorageError::Encode(_))
    }
}
