use std::collections::BTreeMap;
use std::fs;

use serde::{Deserialize, Serialize};
use sift_storage::{
    atomic_write, encode_artifact, read_artifact, ArtifactKind, Compression, StorageError,
    StorageHeader, HEADER_LEN,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Payload {
    name: String,
    lines: Vec<String>,
    index: BTreeMap<String, u32>,
}

fn payload() -> Payload {
    Payload {
        name: "main.c".to_owned(),
        lines: vec!["first\nsecond".to_owned(), String::new()],
        index: BTreeMap::from([("a".to_owned(), 1), ("b".to_owned(), 2)]),
    }
}

#[test]
fn artifact_written_atomically_can_be_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("historycache/repo/main.c.zst");

    let bytes = encode_artifact(ArtifactKind::FileHistory, 7, &payload(), Compression::Zstd).unwrap();
    atomic_write(&path, &bytes).unwrap();

    let header = StorageHeader::decode(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(header.schema_version, 7);
    assert_eq!(header.compression, Compression::Zstd);

    let decoded: Payload = read_artifact(&path, ArtifactKind::FileHistory, 7).unwrap();
    assert_eq!(decoded, payload());
}

#[test]
fn tampered_compressed_payload_is_reported_as_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("artifact.zst");

    let mut bytes =
        encode_artifact(ArtifactKind::FileHistory, 1, &payload(), Compression::Zstd).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    bytes[HEADER_LEN] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let err = read_artifact::<Payload>(&path, ArtifactKind::FileHistory, 1).unwrap_err();
    assert!(err.is_corrupt(), "{err:?}");
    assert!(!matches!(err, StorageError::Io(_)));
}

#[test]
fn appended_bytes_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("artifact");

    let mut bytes =
        encode_artifact(ArtifactKind::FileHistory, 1, &payload(), Compression::None).unwrap();
    bytes.extend_from_slice(b"junk");
    fs::write(&path, &bytes).unwrap();

    let err = read_artifact::<Payload>(&path, ArtifactKind::FileHistory, 1).unwrap_err();
    assert!(matches!(err, StorageError::InvalidHeader(_)), "{err:?}");
}
