use byteorder::{ByteOrder, LittleEndian};

use crate::error::StorageError;

pub const HEADER_LEN: usize = 64;

const MAGIC: [u8; 8] = *b"SIFTART\0";
const FORMAT_VERSION: u16 = 1;
const VERSION_FIELD_LEN: usize = 16;

/// Identifies what an artifact payload contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ArtifactKind {
    /// Per-file revision history (`sift-history`).
    FileHistory = 1,
}

impl ArtifactKind {
    fn from_tag(tag: u16) -> Result<Self, StorageError> {
        match tag {
            1 => Ok(ArtifactKind::FileHistory),
            other => Err(StorageError::UnknownArtifact(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Compression {
    None = 0,
    #[default]
    Zstd = 1,
}

impl Compression {
    fn from_tag(tag: u8) -> Result<Self, StorageError> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Zstd),
            other => Err(StorageError::UnsupportedCompression(other)),
        }
    }
}

/// Fixed-size artifact header.
///
/// Layout (little-endian):
/// `magic[8] format:u16 kind:u16 schema:u32 compression:u8 reserved[7]
///  payload_len:u64 uncompressed_len:u64 content_hash:u64 sift_version[16]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageHeader {
    pub format_version: u16,
    pub kind: ArtifactKind,
    pub schema_version: u32,
    pub compression: Compression,
    pub payload_len: u64,
    pub uncompressed_len: u64,
    pub content_hash: u64,
    sift_version: [u8; VERSION_FIELD_LEN],
}

impl StorageHeader {
    pub fn new(
        kind: ArtifactKind,
        schema_version: u32,
        compression: Compression,
        payload_len: u64,
        uncompressed_len: u64,
        content_hash: u64,
    ) -> Self {
        let mut sift_version = [0u8; VERSION_FIELD_LEN];
        let version = sift_core::SIFT_VERSION.as_bytes();
        let len = version.len().min(VERSION_FIELD_LEN);
        sift_version[..len].copy_from_slice(&version[..len]);

        Self {
            format_version: FORMAT_VERSION,
            kind,
            schema_version,
            compression,
            payload_len,
            uncompressed_len,
            content_hash,
            sift_version,
        }
    }

    /// Version of Sift that wrote the artifact.
    pub fn sift_version(&self) -> String {
        let end = self
            .sift_version
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(VERSION_FIELD_LEN);
        String::from_utf8_lossy(&self.sift_version[..end]).into_owned()
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..8].copy_from_slice(&MAGIC);
        LittleEndian::write_u16(&mut out[8..10], self.format_version);
        LittleEndian::write_u16(&mut out[10..12], self.kind as u16);
        LittleEndian::write_u32(&mut out[12..16], self.schema_version);
        out[16] = self.compression as u8;
        LittleEndian::write_u64(&mut out[24..32], self.payload_len);
        LittleEndian::write_u64(&mut out[32..40], self.uncompressed_len);
        LittleEndian::write_u64(&mut out[40..48], self.content_hash);
        out[48..64].copy_from_slice(&self.sift_version);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.len() < HEADER_LEN {
            return Err(StorageError::Truncated {
                expected: HEADER_LEN,
                found: bytes.len(),
            });
        }
        if bytes[..8] != MAGIC {
            return Err(StorageError::InvalidHeader("bad magic"));
        }

        let format_version = LittleEndian::read_u16(&bytes[8..10]);
        if format_version != FORMAT_VERSION {
            return Err(StorageError::UnsupportedFormat(format_version));
        }

        let kind = ArtifactKind::from_tag(LittleEndian::read_u16(&bytes[10..12]))?;
        let schema_version = LittleEndian::read_u32(&bytes[12..16]);
        let compression = Compression::from_tag(bytes[16])?;
        if bytes[17..24].iter().any(|&b| b != 0) {
            return Err(StorageError::InvalidHeader("reserved bytes are not zero"));
        }

        let mut sift_version = [0u8; VERSION_FIELD_LEN];
        sift_version.copy_from_slice(&bytes[48..64]);

        Ok(Self {
            format_version,
            kind,
            schema_version,
            compression,
            payload_len: LittleEndian::read_u64(&bytes[24..32]),
            uncompressed_len: LittleEndian::read_u64(&bytes[32..40]),
            content_hash: LittleEndian::read_u64(&bytes[40..48]),
            sift_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_survives_encoding() {
        let header = StorageHeader::new(ArtifactKind::FileHistory, 3, Compression::Zstd, 10, 20, 99);
        let decoded = StorageHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.sift_version(), sift_core::SIFT_VERSION);
    }

    #[test]
    fn unknown_compression_tag_is_rejected() {
        let mut bytes =
            StorageHeader::new(ArtifactKind::FileHistory, 1, Compression::None, 0, 0, 0).encode();
        bytes[16] = 7;
        assert!(matches!(
            StorageHeader::decode(&bytes),
            Err(StorageError::UnsupportedCompression(7))
        ));
    }
}
