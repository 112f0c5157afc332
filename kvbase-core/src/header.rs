//! On-disk preamble for KVB database files
//!
//! The header is written once at creation and never touched again:
//! - Bytes 0..3: ASCII `KVB` + one version byte
//! - Bytes 4..11: hash table size S (slots per page), u64
//! - Bytes 12..19: key size K in bytes, u64
//! - Bytes 20..27: value size V in bytes, u64
//!
//! All integers little-endian. A reader rejects a wrong magic, a wrong
//! version, or any geometry field equal to zero as corruption.

use std::fs::OpenOptions;
use std::io::Cursor;

use binrw::{binrw, BinRead, BinWrite};

use crate::error::{Error, Result};

/// File format version. Changes any time the on-disk layout changes.
pub const FORMAT_VERSION: u8 = 1;

/// Encoded header width: 3-byte magic, version byte, three u64 fields.
pub const HEADER_LEN: u64 = 28;

/// How a database file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open existing read-only, fail if missing.
    Rdonly,
    /// Open existing read-write, fail if missing.
    Rdwr,
    /// Open read-write, create if missing.
    RwCreat,
    /// Truncate or create, read-write.
    RwReplace,
}

impl OpenMode {
    pub(crate) fn options(self) -> OpenOptions {
        let mut o = OpenOptions::new();
        match self {
            OpenMode::Rdonly => {
                o.read(true);
            }
            OpenMode::Rdwr => {
                o.read(true).write(true);
            }
            OpenMode::RwCreat => {
                o.read(true).write(true).create(true);
            }
            OpenMode::RwReplace => {
                o.read(true).write(true).create(true).truncate(true);
            }
        }
        o
    }
}

/// The (S, K, V) triple fixed at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Slots per hash page, > 0.
    pub hash_table_size: u64,
    /// Key width in bytes, > 0.
    pub key_size: u64,
    /// Value width in bytes, > 0.
    pub value_size: u64,
}

impl Geometry {
    pub fn new(hash_table_size: u64, key_size: u64, value_size: u64) -> Self {
        Self {
            hash_table_size,
            key_size,
            value_size,
        }
    }

    /// On-disk width of one hash page: S slots plus the next-page cell.
    pub fn page_bytes(&self) -> u64 {
        8 * (self.hash_table_size + 1)
    }

    /// On-disk width of one record: status byte, key, value.
    pub fn record_bytes(&self) -> u64 {
        1 + self.key_size + self.value_size
    }

    fn has_zero_field(&self) -> bool {
        self.hash_table_size == 0 || self.key_size == 0 || self.value_size == 0
    }

    /// Creating a new file requires every field to be non-zero.
    pub(crate) fn check_creatable(&self) -> Result<()> {
        if self.has_zero_field() {
            return Err(Error::InvalidParameters(
                "creating a database requires non-zero hash_table_size, key_size and value_size"
                    .into(),
            ));
        }
        Ok(())
    }
}

/// Database file header.
#[binrw]
#[brw(little, magic = b"KVB")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub hash_table_size: u64,
    pub key_size: u64,
    pub value_size: u64,
}

impl Header {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            version: FORMAT_VERSION,
            hash_table_size: geometry.hash_table_size,
            key_size: geometry.key_size,
            value_size: geometry.value_size,
        }
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            hash_table_size: self.hash_table_size,
            key_size: self.key_size,
            value_size: self.value_size,
        }
    }

    /// Parse and verify an encoded header.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let header = Header::read(&mut cursor).map_err(|e| match e {
            binrw::Error::BadMagic { .. } => Error::Corrupt("bad magic".into()),
            other => other.into(),
        })?;
        header.verify()?;
        Ok(header)
    }

    /// Encode to the 28-byte on-disk image.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(HEADER_LEN as usize));
        self.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    fn verify(&self) -> Result<()> {
        if self.version != FORMAT_VERSION {
            return Err(Error::Corrupt(format!(
                "unsupported format version {} (expected {})",
                self.version, FORMAT_VERSION
            )));
        }
        if self.geometry().has_zero_field() {
            return Err(Error::Corrupt("zero geometry field in header".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        Header::new(Geometry::new(16, 8, 8))
    }

    #[test]
    fn test_encoded_width() {
        let bytes = sample().encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN as usize);
        assert_eq!(&bytes[0..3], b"KVB");
        assert_eq!(bytes[3], FORMAT_VERSION);
        // Geometry fields are little-endian u64s
        assert_eq!(&bytes[4..12], &16u64.to_le_bytes());
        assert_eq!(&bytes[12..20], &8u64.to_le_bytes());
        assert_eq!(&bytes[20..28], &8u64.to_le_bytes());
    }

    #[test]
    fn test_decode_roundtrip() {
        let bytes = sample().encode().unwrap();
        let decoded = Header::decode(&bytes).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_bad_magic_rejected() {
        for i in 0..3 {
            let mut bytes = sample().encode().unwrap();
            bytes[i] ^= 0xFF;
            assert!(matches!(Header::decode(&bytes), Err(Error::Corrupt(_))));
        }
    }

    #[test]
    fn test_bad_version_rejected() {
        let mut bytes = sample().encode().unwrap();
        bytes[3] = FORMAT_VERSION + 1;
        assert!(matches!(Header::decode(&bytes), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_zero_geometry_rejected() {
        for range in [4..12, 12..20, 20..28] {
            let mut bytes = sample().encode().unwrap();
            bytes[range].fill(0);
            assert!(matches!(Header::decode(&bytes), Err(Error::Corrupt(_))));
        }
    }
}
