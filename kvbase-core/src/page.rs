//! Hash-page chain
//!
//! A hash page is S slots plus one next-page cell, `8 * (S + 1)` bytes on
//! disk as consecutive little-endian u64s. Slots hold absolute file
//! offsets of records, 0 meaning empty; the trailing cell holds the
//! absolute offset of the next page, 0 meaning tail of the chain.
//!
//! On disk the chain is singly linked, starting immediately after the
//! header. In memory it is a dense array in chain order, loaded once at
//! open and kept byte-identical to disk across every mutation.

use std::io::Cursor;

use binrw::{BinRead, BinWrite};
use tracing::debug;

use crate::error::{Error, Result};
use crate::file::DataFile;
use crate::header::{Geometry, HEADER_LEN};

/// One hash page: S record slots and the next-page pointer.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
#[br(import(slots: usize))]
pub struct HashPage {
    #[br(count = slots)]
    pub slots: Vec<u64>,
    pub next_page: u64,
}

impl HashPage {
    /// A zero-filled page: every slot empty, no successor.
    pub fn empty(slots: usize) -> Self {
        Self {
            slots: vec![0; slots],
            next_page: 0,
        }
    }

    /// Parse a page image of `slots` slots.
    pub fn decode(bytes: &[u8], slots: usize) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        Ok(HashPage::read_args(&mut cursor, (slots,))?)
    }

    /// Encode to the on-disk image.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity((self.slots.len() + 1) * 8));
        self.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }
}

#[derive(Debug)]
struct LoadedPage {
    /// Absolute file offset of this page's image.
    offset: u64,
    page: HashPage,
}

/// In-memory mirror of the on-disk page chain.
///
/// Indexing is `(page_index, slot_index)`; traversal is chain order. The
/// chain records each page's file offset so slot and next-pointer patches
/// are positioned writes rather than recomputed stream walks.
#[derive(Debug)]
pub struct PageChain {
    pages: Vec<LoadedPage>,
    slots_per_page: usize,
    page_bytes: u64,
}

impl PageChain {
    /// Read the whole chain from `file`, following next-pointers until the
    /// first zero.
    ///
    /// A file that ends exactly where the first page would begin is a
    /// fresh database with no pages yet. A file that ends partway through
    /// a page, or a next-pointer beyond end of file, is corruption.
    pub fn load(file: &mut DataFile, geometry: &Geometry) -> Result<Self> {
        let slots_per_page = geometry.hash_table_size as usize;
        let page_bytes = geometry.page_bytes();
        let file_len = file.len()?;

        let mut chain = Self {
            pages: Vec::new(),
            slots_per_page,
            page_bytes,
        };

        let mut offset = HEADER_LEN;
        let mut buf = vec![0u8; page_bytes as usize];
        loop {
            if chain.pages.is_empty() && offset >= file_len {
                // No page was ever written
                break;
            }
            if file_len.saturating_sub(offset) < page_bytes {
                return Err(Error::Corrupt(format!(
                    "truncated hash page at offset {offset}"
                )));
            }
            file.read_exact_at(offset, &mut buf)?;
            let page = HashPage::decode(&buf, slots_per_page)?;
            let next = page.next_page;
            chain.push(page, offset)?;
            if next == 0 {
                break;
            }
            offset = next;
        }

        debug!(pages = chain.len(), "loaded hash-page chain");
        Ok(chain)
    }

    /// Number of pages in the chain.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn last_index(&self) -> Option<usize> {
        self.pages.len().checked_sub(1)
    }

    pub fn slots_per_page(&self) -> usize {
        self.slots_per_page
    }

    /// Record offset stored in the given slot, 0 if empty.
    pub fn slot(&self, page: usize, slot: usize) -> u64 {
        self.pages[page].page.slots[slot]
    }

    /// Mirror a slot patch that was just written to disk.
    pub fn set_slot(&mut self, page: usize, slot: usize, value: u64) {
        self.pages[page].page.slots[slot] = value;
    }

    /// Mirror a next-pointer patch that was just written to disk.
    pub fn set_next(&mut self, page: usize, value: u64) {
        self.pages[page].page.next_page = value;
    }

    /// Absolute file offset of a slot cell.
    pub fn slot_disk_offset(&self, page: usize, slot: usize) -> u64 {
        self.pages[page].offset + 8 * slot as u64
    }

    /// Absolute file offset of a page's next-pointer cell.
    pub fn next_ptr_disk_offset(&self, page: usize) -> u64 {
        self.pages[page].offset + 8 * self.slots_per_page as u64
    }

    /// Append a page that now exists on disk at `offset`.
    pub fn push(&mut self, page: HashPage, offset: u64) -> Result<()> {
        self.pages.try_reserve(1)?;
        self.pages.push(LoadedPage { offset, page });
        Ok(())
    }
}
