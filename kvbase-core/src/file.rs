//! Positioned file access for the storage engine
//!
//! Every other component addresses the database file by absolute offset;
//! nothing outside this module touches the stream cursor. That keeps the
//! read/write interleaving of the engine free of the seek-before-write
//! dance stdio streams require.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Exclusive handle on the backing file. 64-bit offsets throughout.
///
/// Writes go through the OS file object unbuffered; `flush` exists so the
/// engine can keep its flush-after-mutation contract without implying any
/// fsync-grade durability.
#[derive(Debug)]
pub struct DataFile {
    file: File,
}

impl DataFile {
    /// Open the file at `path` with the given options.
    pub fn open(path: &Path, options: &OpenOptions) -> std::io::Result<Self> {
        let file = options.open(path)?;
        Ok(Self { file })
    }

    /// Current file length in bytes.
    pub fn len(&mut self) -> std::io::Result<u64> {
        self.file.seek(SeekFrom::End(0))
    }

    /// Fill `buf` exactly from `offset`. A short read is an error.
    pub fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    /// Write all of `buf` at `offset`.
    pub fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)
    }

    /// Append `buf` at end of file, returning the offset it landed at.
    pub fn append(&mut self, buf: &[u8]) -> std::io::Result<u64> {
        let offset = self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(buf)?;
        Ok(offset)
    }

    /// Flush buffered writes down to the OS.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}
