//! Fuzz target: `BondStore::load`
//!
//! Writes arbitrary bytes into the bond namespace (count key, slot
//! records, identity record) and verifies:
//! - No panics when restoring from corrupted storage
//! - The restored table never exceeds `BOND_MAX` entries
//! - A fresh pairing can always be stored after a clear
//!
//! cargo fuzz run fuzz_bond_store

#![no_main]

use std::collections::HashMap;

use bleota::app::ports::{StorageError, StoragePort};
use bleota::bonding::{BOND_MAX, BondStore, LinkKeys};
use bleota::gatt::connection::BdAddr;
use libfuzzer_sys::fuzz_target;

// ── In-memory StoragePort for fuzz testing ────────────────────

struct MemStore {
    data: HashMap<String, Vec<u8>>,
}

impl MemStore {
    fn new() -> Self {
        Self { data: HashMap::new() }
    }
}

impl StoragePort for MemStore {
    fn read(&self, ns: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        match self.data.get(&format!("{ns}::{key}")) {
            Some(v) => {
                let n = v.len().min(buf.len());
                buf[..n].copy_from_slice(&v[..n]);
                Ok(n)
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, ns: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.data.insert(format!("{ns}::{key}"), data.to_vec());
        Ok(())
    }

    fn exists(&self, ns: &str, key: &str) -> bool {
        self.data.contains_key(&format!("{ns}::{key}"))
    }

    fn delete(&mut self, ns: &str, key: &str) -> Result<(), StorageError> {
        self.data.remove(&format!("{ns}::{key}"));
        Ok(())
    }
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let mut store = MemStore::new();
    let count = u32::from(data[0] % 8);
    store.write("bonds", "count", &count.to_le_bytes()).unwrap();

    // Slice the rest of the input into one record per slot plus identity.
    let body = &data[1..];
    let part = body.len() / (BOND_MAX + 1) + 1;
    for (i, record) in body.chunks(part).enumerate() {
        let key = if i < BOND_MAX {
            format!("b{i}")
        } else {
            "local_id".to_string()
        };
        store.write("bonds", &key, record).unwrap();
    }

    let mut bonds = BondStore::load(&store);
    assert!(bonds.len() <= BOND_MAX, "restored {} bonds", bonds.len());

    bonds.clear(&mut store);
    assert!(bonds.is_empty());
    let keys = LinkKeys::new(BdAddr::new([1, 2, 3, 4, 5, 6]));
    assert_eq!(bonds.store_link_keys(&mut store, &keys), Ok(0));
});
