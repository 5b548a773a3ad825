//! Bond key persistence.
//!
//! Stores up to [`BOND_MAX`] peer link-key records plus one local identity
//! record in NVS under the `bonds` namespace. Each record is one postcard
//! blob in its own slot key `b{i}`; a count key holds how many slot keys
//! have ever been written. Records remember their slot, so a corrupt slot
//! skipped at load is reused before any valid one is touched.
//!
//! There is no eviction: once every slot holds a different peer, further
//! peers cannot bond and [`BondError::TableFull`] is returned.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{StorageError, StoragePort};
use crate::error::BondError;
use crate::gatt::connection::BdAddr;

pub const BOND_MAX: usize = 4;

const BOND_NAMESPACE: &str = "bonds";
const BOND_COUNT_KEY: &str = "count";
const IDENTITY_KEY: &str = "local_id";

/// Key material the stack hands over when pairing with `addr` completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkKeys {
    pub addr: BdAddr,
    pub addr_type: u8,
    /// Which of the keys below the stack filled in.
    pub key_mask: u8,
    pub key_size: u8,
    pub ltk: [u8; 16],
    pub ediv: u16,
    pub rand: u64,
    pub irk: [u8; 16],
    pub csrk: [u8; 16],
}

impl LinkKeys {
    /// Keys for `addr` with all key material zeroed.
    pub fn new(addr: BdAddr) -> Self {
        Self {
            addr,
            addr_type: 0,
            key_mask: 0,
            key_size: 16,
            ltk: [0; 16],
            ediv: 0,
            rand: 0,
            irk: [0; 16],
            csrk: [0; 16],
        }
    }
}

/// This device's own identity keys (IR / ER derived material).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IdentityKeys {
    /// Zero means the slot holds nothing.
    pub key_type_mask: u8,
    pub irk: [u8; 16],
    pub dhk: [u8; 16],
    pub er: [u8; 16],
}

impl IdentityKeys {
    pub fn is_present(&self) -> bool {
        self.key_type_mask != 0
    }
}

/// NVS-backed bond table.
#[derive(Debug, Default)]
pub struct BondStore {
    /// `(slot index, keys)` per bonded peer.
    bonds: heapless::Vec<(u8, LinkKeys), BOND_MAX>,
    /// Value of the count key: slots `0..slots_used` may hold records.
    slots_used: usize,
    identity: IdentityKeys,
}

impl BondStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore the table from storage. Unreadable slots are skipped.
    pub fn load(nvs: &dyn StoragePort) -> Self {
        let mut store = Self::new();

        let mut buf = [0u8; 4];
        let count = match nvs.read(BOND_NAMESPACE, BOND_COUNT_KEY, &mut buf) {
            Ok(4) => (u32::from_le_bytes(buf) as usize).min(BOND_MAX),
            _ => 0,
        };

        store.slots_used = count;

        for i in 0..count {
            match Self::read_slot(nvs, i) {
                Ok(keys) if store.find(&keys.addr).is_some() => {
                    warn!("BOND: slot {} duplicates {}, skipping", i, keys.addr);
                }
                Ok(keys) => {
                    let _ = store.bonds.push((i as u8, keys));
                }
                Err(e) => warn!("BOND: slot {} skipped: {}", i, e),
            }
        }

        let mut id = [0u8; 128];
        if let Ok(len) = nvs.read(BOND_NAMESPACE, IDENTITY_KEY, &mut id) {
            match postcard::from_bytes::<IdentityKeys>(&id[..len]) {
                Ok(keys) => store.identity = keys,
                Err(_) => warn!("BOND: identity record corrupted"),
            }
        }

        info!(
            "BOND: restored {} bond(s), identity {}",
            store.bonds.len(),
            if store.identity.is_present() { "present" } else { "absent" }
        );
        store
    }

    pub fn len(&self) -> usize {
        self.bonds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bonds.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.bonds.is_full()
    }

    /// Exact 6-byte address match.
    pub fn find(&self, addr: &BdAddr) -> Option<&LinkKeys> {
        self.bonds
            .iter()
            .map(|(_, k)| k)
            .find(|k| k.addr.as_bytes() == addr.as_bytes())
    }

    /// Keys for a peer the stack is asking about.
    pub fn link_keys(&self, addr: &BdAddr) -> Result<LinkKeys, BondError> {
        self.find(addr).copied().ok_or(BondError::NotFound)
    }

    /// Persist keys from a completed pairing. A peer already in the table
    /// keeps its slot. Returns the slot index used.
    pub fn store_link_keys(
        &mut self,
        nvs: &mut dyn StoragePort,
        keys: &LinkKeys,
    ) -> Result<usize, BondError> {
        let existing = self
            .bonds
            .iter()
            .position(|(_, k)| k.addr.as_bytes() == keys.addr.as_bytes());

        let slot = match existing {
            Some(i) => usize::from(self.bonds[i].0),
            None if self.is_full() => {
                warn!("BOND: table full, cannot bond {}", keys.addr);
                return Err(BondError::TableFull);
            }
            None => self.free_slot().ok_or(BondError::TableFull)?,
        };

        let bytes = postcard::to_allocvec(keys).map_err(|_| BondError::Storage)?;
        nvs.write(BOND_NAMESPACE, &Self::slot_key(slot), &bytes)
            .map_err(storage_error)?;

        if let Some(i) = existing {
            self.bonds[i].1 = *keys;
            info!("BOND: updated {} in slot {}", keys.addr, slot);
            return Ok(slot);
        }

        if slot >= self.slots_used {
            let count = (slot as u32 + 1).to_le_bytes();
            nvs.write(BOND_NAMESPACE, BOND_COUNT_KEY, &count)
                .map_err(storage_error)?;
            self.slots_used = slot + 1;
        }
        // Capacity checked above.
        let _ = self.bonds.push((slot as u8, *keys));
        info!("BOND: stored {} in slot {}", keys.addr, slot);
        Ok(slot)
    }

    /// Lowest slot index no bonded peer occupies.
    fn free_slot(&self) -> Option<usize> {
        (0..BOND_MAX).find(|&i| self.bonds.iter().all(|(s, _)| usize::from(*s) != i))
    }

    fn read_slot(nvs: &dyn StoragePort, index: usize) -> Result<LinkKeys, BondError> {
        let mut buf = [0u8; 128];
        let len = nvs
            .read(BOND_NAMESPACE, &Self::slot_key(index), &mut buf)
            .map_err(|e| match e {
                StorageError::NotFound => BondError::NotFound,
                _ => BondError::Storage,
            })?;
        postcard::from_bytes(&buf[..len]).map_err(|_| BondError::Corrupted)
    }

    pub fn identity(&self) -> Result<&IdentityKeys, BondError> {
        if self.identity.is_present() {
            Ok(&self.identity)
        } else {
            Err(BondError::NoIdentityKeys)
        }
    }

    /// Overwrite the single identity slot.
    pub fn store_identity(
        &mut self,
        nvs: &mut dyn StoragePort,
        keys: &IdentityKeys,
    ) -> Result<(), BondError> {
        let bytes = postcard::to_allocvec(keys).map_err(|_| BondError::Storage)?;
        nvs.write(BOND_NAMESPACE, IDENTITY_KEY, &bytes)
            .map_err(storage_error)?;
        self.identity = *keys;
        info!("BOND: local identity keys saved (mask 0x{:02x})", keys.key_type_mask);
        Ok(())
    }

    /// Forget every peer and the identity keys.
    pub fn clear(&mut self, nvs: &mut dyn StoragePort) {
        for i in 0..BOND_MAX {
            let _ = nvs.delete(BOND_NAMESPACE, &Self::slot_key(i));
        }
        let _ = nvs.delete(BOND_NAMESPACE, BOND_COUNT_KEY);
        let _ = nvs.delete(BOND_NAMESPACE, IDENTITY_KEY);
        self.bonds.clear();
        self.slots_used = 0;
        self.identity = IdentityKeys::default();
    }

    fn slot_key(index: usize) -> heapless::String<16> {
        let mut s = heapless::String::new();
        let _ = core::fmt::Write::write_fmt(&mut s, format_args!("b{}", index));
        s
    }
}

fn storage_error(e: StorageError) -> BondError {
    warn!("BOND: storage write failed: {}", e);
    BondError::Storage
}
