//! Iteration over live entries
//!
//! A `(page, slot)` cursor sweeps the in-memory chain, skipping empty
//! slots and tombstones and reading each referenced record off disk. The
//! yield order depends on how keys hashed and is unspecified.

use crate::error::Result;
use crate::store::{Store, STATUS_LIVE};

/// Lazy sequence of live `(key, value)` pairs.
///
/// Holds the store's mutable borrow for its whole lifetime, so the
/// database cannot be mutated mid-iteration. Finite; re-iterating means
/// calling [`Store::iter`] again.
pub struct Entries<'a> {
    store: &'a mut Store,
    page: usize,
    slot: usize,
}

impl<'a> Entries<'a> {
    pub(crate) fn new(store: &'a mut Store) -> Self {
        Self {
            store,
            page: 0,
            slot: 0,
        }
    }

    fn step(&mut self) {
        self.slot += 1;
        if self.slot >= self.store.slots_per_page() {
            self.slot = 0;
            self.page += 1;
        }
    }
}

impl Iterator for Entries<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.page >= self.store.chain_len() {
                return None;
            }
            let offset = self.store.slot_at(self.page, self.slot);
            self.step();
            if offset == 0 {
                continue;
            }
            match self.store.read_record(offset) {
                Ok((status, key, value)) => {
                    if status == STATUS_LIVE {
                        return Some(Ok((key, value)));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Geometry, OpenMode};
    use tempfile::TempDir;

    fn open(dir: &TempDir, slots: u64) -> Store {
        Store::open(
            dir.path().join("iter.kvb"),
            OpenMode::RwCreat,
            Geometry::new(slots, 4, 4),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_database_is_exhausted() {
        let tmp = TempDir::new().unwrap();
        let mut store = open(&tmp, 8);
        assert!(store.iter().next().is_none());
    }

    #[test]
    fn test_yields_each_live_entry_once() {
        let tmp = TempDir::new().unwrap();
        let mut store = open(&tmp, 2);
        for i in 0u8..6 {
            store.put(&[i; 4], &[i + 10; 4]).unwrap();
        }
        store.delete(&[2; 4]).unwrap();

        let mut seen: Vec<Vec<u8>> = store
            .iter()
            .map(|e| e.unwrap())
            .map(|(k, _)| k)
            .collect();
        seen.sort();
        assert_eq!(
            seen,
            vec![vec![0; 4], vec![1; 4], vec![3; 4], vec![4; 4], vec![5; 4]]
        );
    }

    #[test]
    fn test_observes_in_place_overwrite() {
        let tmp = TempDir::new().unwrap();
        let mut store = open(&tmp, 8);
        store.put(&[1; 4], &[0xAA; 4]).unwrap();
        store.put(&[1; 4], &[0xBB; 4]).unwrap();

        let entries: Vec<_> = store.iter().map(|e| e.unwrap()).collect();
        assert_eq!(entries, vec![(vec![1; 4], vec![0xBB; 4])]);
    }
}
