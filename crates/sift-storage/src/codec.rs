use std::borrow::Cow;
use std::io::Read;
use std::path::Path;

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;
use crate::header::{ArtifactKind, Compression, StorageHeader, HEADER_LEN};

/// Hard upper bound for any artifact payload we will attempt to decode.
///
/// Cache corruption should degrade to a cache miss, not an out-of-memory crash.
pub const PAYLOAD_LIMIT_BYTES: usize = 64 * 1024 * 1024;

fn bincode_options() -> impl bincode::Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

fn bincode_options_limited() -> impl bincode::Options + Copy {
    bincode_options().with_limit(PAYLOAD_LIMIT_BYTES as u64)
}

fn content_hash(payload: &[u8]) -> u64 {
    let hash_bytes = blake3::hash(payload);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash_bytes.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

/// Serializes `value` into a self-describing artifact (header + payload).
pub fn encode_artifact<T: Serialize>(
    kind: ArtifactKind,
    schema_version: u32,
    value: &T,
    compression: Compression,
) -> Result<Vec<u8>, StorageError> {
    let payload = bincode_options()
        .serialize(value)
        .map_err(|e| StorageError::Encode(e.to_string()))?;
    let uncompressed_len = payload.len() as u64;
    let hash = content_hash(&payload);

    let body = match compression {
        Compression::None => payload,
        Compression::Zstd => {
            zstd::bulk::compress(&payload, 0).map_err(|e| StorageError::Encode(e.to_string()))?
        }
    };

    let header = StorageHeader::new(
        kind,
        schema_version,
        compression,
        body.len() as u64,
        uncompressed_len,
        hash,
    );

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decodes an artifact produced by [`encode_artifact`], validating kind, schema,
/// lengths and content hash before deserializing the payload.
pub fn decode_artifact<T: DeserializeOwned>(
    bytes: &[u8],
    kind: ArtifactKind,
    schema_version: u32,
) -> Result<T, StorageError> {
    let header = StorageHeader::decode(bytes)?;
    if header.kind != kind {
        return Err(StorageError::WrongArtifact {
            expected: kind,
            found: header.kind,
        });
    }
    if header.schema_version != schema_version {
        return Err(StorageError::WrongSchema {
            expected: schema_version,
            found: header.schema_version,
        });
    }
    if header.uncompressed_len > PAYLOAD_LIMIT_BYTES as u64 {
        return Err(StorageError::OversizedPayload {
            payload_len: header.uncompressed_len,
        });
    }

    let body = &bytes[HEADER_LEN..];
    if (body.len() as u64) < header.payload_len {
        return Err(StorageError::Truncated {
            expected: HEADER_LEN.saturating_add(header.payload_len as usize),
            found: bytes.len(),
        });
    }
    if (body.len() as u64) > header.payload_len {
        return Err(StorageError::InvalidHeader("trailing bytes after payload"));
    }

    let payload: Cow<'_, [u8]> = match header.compression {
        Compression::None => Cow::Borrowed(body),
        Compression::Zstd => {
            let decoder = zstd::stream::read::Decoder::new(body)
                .map_err(|e| StorageError::Decompression(e.to_string()))?;
            let mut out = Vec::with_capacity(header.uncompressed_len as usize);
            // Read one byte past the declared length so oversized streams are detected below.
            decoder
                .take(header.uncompressed_len.saturating_add(1))
                .read_to_end(&mut out)
                .map_err(|e| StorageError::Decompression(e.to_string()))?;
            Cow::Owned(out)
        }
    };

    if payload.len() as u64 != header.uncompressed_len {
        return Err(StorageError::InvalidHeader("uncompressed length mismatch"));
    }

    let found = content_hash(&payload);
    if found != header.content_hash {
        return Err(StorageError::HashMismatch {
            expected: header.content_hash,
            found,
        });
    }

    bincode_options_limited()
        .deserialize(&payload)
        .map_err(|e| StorageError::Decode(e.to_string()))
}

/// Reads and decodes the artifact stored at `path`.
pub fn read_artifact<T: DeserializeOwned>(
    path: &Path,
    kind: ArtifactKind,
    schema_version: u32,
) -> Result<T, StorageError> {
    let len = std::fs::metadata(path)?.len();
    if len > (PAYLOAD_LIMIT_BYTES + HEADER_LEN) as u64 {
        return Err(StorageError::OversizedPayload { payload_len: len });
    }

    let bytes = std::fs::read(path)?;
    decode_artifact(&bytes, kind, schema_version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
    struct Sample {
        a: u32,
        b: String,
        values: Vec<u64>,
    }

    fn sample() -> Sample {
        Sample {
            a: 42,
            b: "hello\nworld".to_string(),
            values: vec![1, 2, 3, 4],
        }
    }

    #[test]
    fn uncompressed_and_zstd_artifacts_decode() {
        for compression in [Compression::None, Compression::Zstd] {
            let bytes = encode_artifact(ArtifactKind::FileHistory, 1, &sample(), compression).unwrap();
            let decoded: Sample = decode_artifact(&bytes, ArtifactKind::FileHistory, 1).unwrap();
            assert_eq!(decoded, sample());
        }
    }

    #[test]
    fn schema_mismatch_is_corrupt() {
        let bytes =
            encode_artifact(ArtifactKind::FileHistory, 1, &sample(), Compression::Zstd).unwrap();
        let err = decode_artifact::<Sample>(&bytes, ArtifactKind::FileHistory, 2).unwrap_err();
        assert!(matches!(err, StorageError::WrongSchema { expected: 2, found: 1 }));
        assert!(err.is_corrupt());
    }

    #[test]
    fn truncated_artifact_is_error() {
        let bytes =
            encode_artifact(ArtifactKind::FileHistory, 1, &sample(), Compression::None).unwrap();

        let err = decode_artifact::<Sample>(&bytes[..HEADER_LEN - 1], ArtifactKind::FileHistory, 1)
            .unwrap_err();
        assert!(matches!(err, StorageError::Truncated { .. }), "{err:?}");

        let err = decode_artifact::<Sample>(&bytes[..bytes.len() - 1], ArtifactKind::FileHistory, 1)
            .unwrap_err();
        assert!(matches!(err, StorageError::Truncated { .. }), "{err:?}");
    }

    #[test]
    fn flipped_payload_byte_is_hash_mismatch() {
        let mut bytes =
            encode_artifact(ArtifactKind::FileHistory, 1, &sample(), Compression::None).unwrap();
        // `a` is the first fixint field of the payload.
        bytes[HEADER_LEN] ^= 0x01;

        let err = decode_artifact::<Sample>(&bytes, ArtifactKind::FileHistory, 1).unwrap_err();
        match err {
            StorageError::HashMismatch { expected, found } => assert_ne!(expected, found),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn garbage_is_corrupt_not_io() {
        let err = decode_artifact::<Sample>(&[0xAB; 100], ArtifactKind::FileHistory, 1).unwrap_err();
        assert!(err.is_corrupt(), "{err:?}");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err =
            read_artifact::<Sample>(&dir.path().join("missing"), ArtifactKind::FileHistory, 1)
                .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(!err.is_corrupt());
    }
}
