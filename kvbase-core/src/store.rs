//! Record engine: open, get, put, delete
//!
//! A record is one status byte (1 live, 0 tombstone), K key bytes, V value
//! bytes. Records append at end of file; hash-page slots point at them by
//! absolute offset. A put that finds no matching key and no empty slot in
//! the whole chain appends a new hash page, and the record right after it.
//!
//! All writes are flushed before a mutating call returns. There is no
//! fsync, no locking, and no support for sharing a handle across threads
//! without external synchronisation.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::file::DataFile;
use crate::header::{Geometry, Header, OpenMode, HEADER_LEN};
use crate::iter::Entries;
use crate::page::{HashPage, PageChain};

pub(crate) const STATUS_TOMBSTONE: u8 = 0;
pub(crate) const STATUS_LIVE: u8 = 1;

/// Streaming key comparison works through a bounded stack buffer.
const KEY_CHUNK: usize = 255;

/// djb2 over the key bytes, wrapping 64-bit arithmetic.
fn djb2(key: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &byte in key {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u64);
    }
    hash
}

/// An open database: the backing file, its geometry, and the in-memory
/// mirror of the hash-page chain.
///
/// Strictly single-threaded; mutating operations take `&mut self` and the
/// iterator holds the mutable borrow for its whole lifetime. Closing is
/// `Drop`; [`Store::close`] exists for callers that want the point in the
/// source where the file goes away to be visible.
#[derive(Debug)]
pub struct Store {
    file: DataFile,
    path: PathBuf,
    geometry: Geometry,
    chain: PageChain,
}

impl Store {
    /// Open a database file.
    ///
    /// If the file is missing or shorter than a header, `geometry` must
    /// have all three fields non-zero and is written as the new header
    /// (creating modes only; read-only opens of missing files fail with
    /// the underlying I/O error). Otherwise the header is read, verified,
    /// and `geometry` is ignored in favour of what the file declares.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode, geometry: Geometry) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = DataFile::open(&path, &mode.options())?;

        let header = if file.len()? < HEADER_LEN {
            geometry.check_creatable()?;
            let header = Header::new(geometry);
            file.write_all_at(0, &header.encode()?)?;
            file.flush()?;
            debug!(path = %path.display(), "created database file");
            header
        } else {
            let mut buf = [0u8; HEADER_LEN as usize];
            file.read_exact_at(0, &mut buf)?;
            Header::decode(&buf)?
        };

        let geometry = header.geometry();
        let chain = PageChain::load(&mut file, &geometry)?;
        debug!(
            path = %path.display(),
            slots = geometry.hash_table_size,
            key_size = geometry.key_size,
            value_size = geometry.value_size,
            pages = chain.len(),
            "opened database"
        );

        Ok(Self {
            file,
            path,
            geometry,
            chain,
        })
    }

    /// Close the database, releasing the file and the page memory.
    pub fn close(self) {}

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Length of the hash-page chain.
    pub fn page_count(&self) -> usize {
        self.chain.len()
    }

    /// Look up `key`, filling `value_out` on a hit.
    ///
    /// Returns `Ok(true)` when found, `Ok(false)` when the key is absent
    /// or tombstoned.
    pub fn get(&mut self, key: &[u8], value_out: &mut [u8]) -> Result<bool> {
        self.check_key(key)?;
        self.check_value(value_out)?;

        let slot = self.slot_index(key);
        for page in 0..self.chain.len() {
            let offset = self.chain.slot(page, slot);
            if offset == 0 {
                // An insert would have used this slot, so the key is absent
                return Ok(false);
            }
            let status = self.read_status(offset)?;
            if !self.key_matches(offset, key)? {
                continue;
            }
            if status == STATUS_TOMBSTONE {
                return Ok(false);
            }
            self.file
                .read_exact_at(offset + 1 + self.geometry.key_size, value_out)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Insert or overwrite `key`.
    ///
    /// Overwrites of live entries rewrite the value in place; re-inserts
    /// over a tombstone revive its slot. The file only grows on first
    /// insertion of a key.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.check_value(value)?;
        self.upsert(key, Some(value))
    }

    /// Tombstone `key`. Fails with [`Error::NotPresent`] if no record for
    /// it exists.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.upsert(key, None)
    }

    /// Iterate over all live `(key, value)` pairs. Order depends on hash
    /// placement and is unspecified.
    pub fn iter(&mut self) -> Entries<'_> {
        Entries::new(self)
    }

    /// Shared walk for put (`Some(value)`) and delete (`None`).
    fn upsert(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        let slot = self.slot_index(key);

        for page in 0..self.chain.len() {
            let offset = self.chain.slot(page, slot);
            if offset == 0 {
                // Empty slot: the key has no record anywhere
                let Some(value) = value else {
                    return Err(Error::NotPresent);
                };
                return self.insert_into_slot(page, slot, key, value);
            }

            let status = self.read_status(offset)?;
            if !self.key_matches(offset, key)? {
                continue;
            }

            return match value {
                None => {
                    self.file.write_all_at(offset, &[STATUS_TOMBSTONE])?;
                    self.file.flush()?;
                    Ok(())
                }
                Some(value) if status == STATUS_TOMBSTONE => {
                    // Revive the reserved slot: status, key and value are
                    // all rewritten
                    let image = self.record_image(key, value);
                    self.file.write_all_at(offset, &image)?;
                    self.file.flush()?;
                    Ok(())
                }
                Some(value) => {
                    self.file
                        .write_all_at(offset + 1 + self.geometry.key_size, value)?;
                    self.file.flush()?;
                    Ok(())
                }
            };
        }

        // Every page's slot holds some other key
        let Some(value) = value else {
            return Err(Error::NotPresent);
        };
        self.append_page(slot, key, value)
    }

    /// Append a record at EOF and patch an existing page's empty slot.
    fn insert_into_slot(
        &mut self,
        page: usize,
        slot: usize,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let image = self.record_image(key, value);
        let record_offset = self.file.append(&image)?;
        let slot_offset = self.chain.slot_disk_offset(page, slot);
        self.file
            .write_all_at(slot_offset, &record_offset.to_le_bytes())?;
        self.chain.set_slot(page, slot, record_offset);
        self.file.flush()?;
        Ok(())
    }

    /// Grow the chain: new zero-filled page at EOF with `slot` pre-pointing
    /// at the record appended right after it, then link the old tail.
    fn append_page(&mut self, slot: usize, key: &[u8], value: &[u8]) -> Result<()> {
        let mut page = HashPage::empty(self.chain.slots_per_page());
        let page_offset = self.file.len()?;
        page.slots[slot] = page_offset + self.geometry.page_bytes();

        self.file.append(&page.encode()?)?;
        let image = self.record_image(key, value);
        self.file.append(&image)?;

        if let Some(tail) = self.chain.last_index() {
            let next_ptr_offset = self.chain.next_ptr_disk_offset(tail);
            self.file
                .write_all_at(next_ptr_offset, &page_offset.to_le_bytes())?;
            self.chain.set_next(tail, page_offset);
        }
        self.chain.push(page, page_offset)?;

        self.file.flush()?;
        debug!(offset = page_offset, pages = self.chain.len(), "appended hash page");
        Ok(())
    }

    fn record_image(&self, key: &[u8], value: &[u8]) -> Vec<u8> {
        let mut image = Vec::with_capacity(self.geometry.record_bytes() as usize);
        image.push(STATUS_LIVE);
        image.extend_from_slice(key);
        image.extend_from_slice(value);
        image
    }

    fn slot_index(&self, key: &[u8]) -> usize {
        (djb2(key) % self.geometry.hash_table_size) as usize
    }

    fn read_status(&mut self, record_offset: u64) -> Result<u8> {
        let mut status = [0u8; 1];
        self.file.read_exact_at(record_offset, &mut status)?;
        Ok(status[0])
    }

    /// Compare the stored key against `key` in bounded chunks.
    fn key_matches(&mut self, record_offset: u64, key: &[u8]) -> Result<bool> {
        let mut chunk = [0u8; KEY_CHUNK];
        let mut pos = 0;
        while pos < key.len() {
            let n = (key.len() - pos).min(KEY_CHUNK);
            let buf = &mut chunk[..n];
            self.file
                .read_exact_at(record_offset + 1 + pos as u64, buf)?;
            if buf != &key[pos..pos + n] {
                return Ok(false);
            }
            pos += n;
        }
        Ok(true)
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() as u64 != self.geometry.key_size {
            return Err(Error::InvalidParameters(format!(
                "key is {} bytes, database expects {}",
                key.len(),
                self.geometry.key_size
            )));
        }
        Ok(())
    }

    fn check_value(&self, value: &[u8]) -> Result<()> {
        if value.len() as u64 != self.geometry.value_size {
            return Err(Error::InvalidParameters(format!(
                "value buffer is {} bytes, database expects {}",
                value.len(),
                self.geometry.value_size
            )));
        }
        Ok(())
    }

    // Iterator plumbing

    pub(crate) fn chain_len(&self) -> usize {
        self.chain.len()
    }

    pub(crate) fn slots_per_page(&self) -> usize {
        self.chain.slots_per_page()
    }

    pub(crate) fn slot_at(&self, page: usize, slot: usize) -> u64 {
        self.chain.slot(page, slot)
    }

    /// Read a whole record: status byte, key, value.
    pub(crate) fn read_record(&mut self, offset: u64) -> Result<(u8, Vec<u8>, Vec<u8>)> {
        let mut image = vec![0u8; self.geometry.record_bytes() as usize];
        self.file.read_exact_at(offset, &mut image)?;
        let value = image.split_off(1 + self.geometry.key_size as usize);
        let key = image.split_off(1);
        Ok((image[0], key, value))
    }
}
