//! Offline validation of KVB database files
//!
//! Walks the raw bytes of a database file without opening it as a store:
//! header, page chain, every referenced record. Problems accumulate into
//! a report instead of failing fast, so one pass lists everything wrong
//! with a damaged file.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::header::{Header, HEADER_LEN};

/// Statistics about a database file.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DbStats {
    pub file_size: u64,
    pub hash_table_size: u64,
    pub key_size: u64,
    pub value_size: u64,
    pub pages: u64,
    pub live_entries: u64,
    pub tombstones: u64,
}

/// Result of validating a database file.
#[derive(Debug, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub stats: DbStats,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn new() -> Self {
        Self {
            valid: true,
            stats: DbStats::default(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn add_error(&mut self, msg: impl Into<String>) {
        self.valid = false;
        self.errors.push(msg.into());
    }

    fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Print a human-readable report to stdout. Returns `valid`.
    pub fn print(&self) -> bool {
        println!("KVB validation results");
        println!("======================");
        println!();
        println!("Status: {}", if self.valid { "VALID" } else { "INVALID" });
        println!();
        println!("Statistics:");
        println!("  File size: {} bytes", self.stats.file_size);
        println!(
            "  Geometry: S={} K={} V={}",
            self.stats.hash_table_size, self.stats.key_size, self.stats.value_size
        );
        println!("  Hash pages: {}", self.stats.pages);
        println!("  Live entries: {}", self.stats.live_entries);
        println!("  Tombstones: {}", self.stats.tombstones);
        println!();

        if !self.errors.is_empty() {
            println!("Errors:");
            for err in &self.errors {
                println!("  - {}", err);
            }
            println!();
        }

        if !self.warnings.is_empty() {
            println!("Warnings:");
            for warn in &self.warnings {
                println!("  - {}", warn);
            }
            println!();
        }

        self.valid
    }
}

/// Validate a database file read into memory.
///
/// Checks:
/// - Header magic, version, and non-zero geometry
/// - Every chained hash page lies fully inside the file
/// - The chain terminates (no next-pointer cycles)
/// - Every non-empty slot points at a record that fits in the file
/// - Record status bytes are 0 or 1
/// - No key is live in more than one slot
pub fn validate_bytes(data: &[u8]) -> ValidationResult {
    let mut result = ValidationResult::new();
    result.stats.file_size = data.len() as u64;

    if (data.len() as u64) < HEADER_LEN {
        result.add_error(format!(
            "file too small: {} bytes (header is {} bytes)",
            data.len(),
            HEADER_LEN
        ));
        return result;
    }

    let header = match Header::decode(&data[..HEADER_LEN as usize]) {
        Ok(h) => h,
        Err(e) => {
            result.add_error(e.to_string());
            return result;
        }
    };
    let geometry = header.geometry();
    result.stats.hash_table_size = geometry.hash_table_size;
    result.stats.key_size = geometry.key_size;
    result.stats.value_size = geometry.value_size;

    let file_len = data.len() as u64;
    let page_bytes = geometry.page_bytes();
    let record_bytes = geometry.record_bytes();
    let slots = geometry.hash_table_size as usize;

    // Upper bound on real pages; more traversal steps than this means the
    // next-pointers loop back on themselves
    let max_pages = (file_len - HEADER_LEN) / page_bytes + 1;

    let mut live_keys: HashSet<&[u8]> = HashSet::new();
    let mut offset = HEADER_LEN;
    let mut first = true;
    loop {
        if first && offset >= file_len {
            break; // fresh database, no pages
        }
        first = false;

        if result.stats.pages >= max_pages {
            result.add_error("hash-page chain does not terminate (next-pointer cycle)");
            break;
        }
        if file_len.saturating_sub(offset) < page_bytes {
            result.add_error(format!("truncated hash page at offset {offset}"));
            break;
        }
        result.stats.pages += 1;

        let page = &data[offset as usize..(offset + page_bytes) as usize];
        for slot in 0..slots {
            let record_offset = read_u64(page, slot * 8);
            if record_offset == 0 {
                continue;
            }
            if record_offset < HEADER_LEN || record_offset + record_bytes > file_len {
                result.add_error(format!(
                    "slot {slot} of page at {offset} points outside the file ({record_offset})"
                ));
                continue;
            }
            let record = &data[record_offset as usize..(record_offset + record_bytes) as usize];
            let status = record[0];
            let key = &record[1..1 + geometry.key_size as usize];
            match status {
                0 => result.stats.tombstones += 1,
                1 => {
                    result.stats.live_entries += 1;
                    if !live_keys.insert(key) {
                        result.add_error(format!(
                            "key {} is live in more than one slot",
                            hex(key)
                        ));
                    }
                }
                other => result.add_error(format!(
                    "record at {record_offset} has invalid status byte {other}"
                )),
            }
        }

        let next = read_u64(page, slots * 8);
        if next == 0 {
            break;
        }
        if next < HEADER_LEN {
            result.add_error(format!("next-pointer {next} reaches into the header"));
            break;
        }
        offset = next;
    }

    if result.valid && result.stats.tombstones > result.stats.live_entries {
        result.add_warning("more tombstones than live entries; deleted space is never reclaimed");
    }

    result
}

/// Read `path` and validate its contents.
pub fn validate_file<P: AsRef<Path>>(path: P) -> Result<ValidationResult> {
    let data = std::fs::read(path)?;
    Ok(validate_bytes(&data))
}

fn read_u64(bytes: &[u8], pos: usize) -> u64 {
    let mut cell = [0u8; 8];
    cell.copy_from_slice(&bytes[pos..pos + 8]);
    u64::from_le_bytes(cell)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Geometry, OpenMode};
    use crate::store::Store;
    use tempfile::TempDir;

    fn build_db(slots: u64, entries: u8, deletes: &[u8]) -> Vec<u8> {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("check.kvb");
        let mut store =
            Store::open(&path, OpenMode::RwCreat, Geometry::new(slots, 2, 2)).unwrap();
        for i in 0..entries {
            store.put(&[i, i], &[i, i]).unwrap();
        }
        for &i in deletes {
            store.delete(&[i, i]).unwrap();
        }
        store.close();
        std::fs::read(&path).unwrap()
    }

    #[test]
    fn test_clean_file_is_valid() {
        let data = build_db(4, 10, &[3]);
        let result = validate_bytes(&data);
        assert!(result.valid, "errors: {:?}", result.errors);
        assert_eq!(result.stats.live_entries, 9);
        assert_eq!(result.stats.tombstones, 1);
        assert!(result.stats.pages >= 2);
    }

    #[test]
    fn test_empty_database_is_valid() {
        let data = build_db(4, 0, &[]);
        let result = validate_bytes(&data);
        assert!(result.valid);
        assert_eq!(result.stats.pages, 0);
    }

    #[test]
    fn test_too_small_file() {
        let result = validate_bytes(&[0u8; 10]);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("too small")));
    }

    #[test]
    fn test_bad_header_reported() {
        let mut data = build_db(4, 1, &[]);
        data[0] = b'X';
        let result = validate_bytes(&data);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("magic")));
    }

    #[test]
    fn test_truncated_page_reported() {
        let mut data = build_db(4, 1, &[]);
        data.truncate(data.len() - 3);
        let result = validate_bytes(&data);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("truncated")));
    }

    #[test]
    fn test_invalid_status_byte_reported() {
        let mut data = build_db(4, 1, &[]);
        // Single page of 4 slots follows the header; the record follows it
        let record_offset = HEADER_LEN + 5 * 8;
        data[record_offset as usize] = 7;
        let result = validate_bytes(&data);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("status byte")));
    }

    #[test]
    fn test_slot_past_eof_reported() {
        let mut data = build_db(4, 1, &[]);
        let record_offset = HEADER_LEN + 5 * 8;
        // Find the slot holding the record and aim it past EOF
        let page = HEADER_LEN as usize;
        let mut patched = false;
        for slot in 0..4 {
            let cell = page + slot * 8;
            let value = u64::from_le_bytes(data[cell..cell + 8].try_into().unwrap());
            if value == record_offset {
                data[cell..cell + 8].copy_from_slice(&(1u64 << 40).to_le_bytes());
                patched = true;
            }
        }
        assert!(patched);
        let result = validate_bytes(&data);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("outside the file")));
    }

    #[test]
    fn test_duplicate_live_key_reported() {
        // Hand-built file: S=1, K=1, V=1, two pages whose slots both hold
        // a live record for key 0x6B
        let header = crate::header::Header::new(Geometry::new(1, 1, 1));
        let mut data = header.encode().unwrap();
        let p0 = 28u64;
        let r0 = p0 + 16;
        let p1 = r0 + 3;
        let r1 = p1 + 16;
        data.extend_from_slice(&r0.to_le_bytes()); // page0 slot
        data.extend_from_slice(&p1.to_le_bytes()); // page0 next
        data.extend_from_slice(&[1, 0x6B, b'x']); // record 0
        data.extend_from_slice(&r1.to_le_bytes()); // page1 slot
        data.extend_from_slice(&0u64.to_le_bytes()); // page1 next
        data.extend_from_slice(&[1, 0x6B, b'y']); // record 1

        let result = validate_bytes(&data);
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("more than one slot")));
    }

    #[test]
    fn test_next_pointer_cycle_reported() {
        // One page whose next-pointer leads back to itself
        let header = crate::header::Header::new(Geometry::new(1, 1, 1));
        let mut data = header.encode().unwrap();
        data.extend_from_slice(&0u64.to_le_bytes()); // empty slot
        data.extend_from_slice(&28u64.to_le_bytes()); // next = self
        data.extend_from_slice(&[0u8; 64]); // room for the bound to bite

        let result = validate_bytes(&data);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("cycle")));
    }

    #[test]
    fn test_validate_file_reads_disk() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("check.kvb");
        let mut store =
            Store::open(&path, OpenMode::RwCreat, Geometry::new(4, 2, 2)).unwrap();
        store.put(&[1, 2], &[3, 4]).unwrap();
        store.close();

        let result = validate_file(&path).unwrap();
        assert!(result.valid);
        assert_eq!(result.stats.live_entries, 1);
    }
}
