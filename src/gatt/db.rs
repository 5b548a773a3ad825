//! Attribute table and the OTA service layout.
//!
//! ## GATT Service Layout
//!
//! | Handle   | Attribute                         | UUID                                   |
//! |----------|-----------------------------------|----------------------------------------|
//! | `0x0001` | GAP primary service               | `0x1800`                               |
//! | `0x0003` | Device name                       | `0x2A00`                               |
//! | `0x0005` | Appearance                        | `0x2A01`                               |
//! | `0x0030` | OTA primary service               | `ae5d1e47-5c13-43a0-8635-82ad38a1381f` |
//! | `0x0032` | OTA control point (write/notify/indicate) | `c7261110-f425-447a-a1bd-9d7246768bd8` |
//! | `0x0033` | Control point CCCD                | `0x2902`                               |
//! | `0x0035` | OTA data (write)                  | `7c4a3a93-5bb4-4e4a-b7b0-3c8a07f26f4a` |
//!
//! Characteristic declarations sit one handle below their values.

use log::debug;

use crate::config::OtaConfig;
use crate::error::AttributeError;
use crate::gatt::att::Uuid;

// ── Constants ────────────────────────────────────────────────

pub const OTA_SERVICE_UUID: u128 = 0xae5d1e47_5c13_43a0_8635_82ad38a1381f;
pub const CHAR_CONTROL_POINT_UUID: u128 = 0xc7261110_f425_447a_a1bd_9d7246768bd8;
pub const CHAR_DATA_UUID: u128 = 0x7c4a3a93_5bb4_4e4a_b7b0_3c8a07f26f4a;

pub const GAP_SERVICE_HANDLE: u16 = 0x0001;
pub const DEVICE_NAME_HANDLE: u16 = 0x0003;
pub const APPEARANCE_HANDLE: u16 = 0x0005;
pub const OTA_SERVICE_HANDLE: u16 = 0x0030;
pub const CONTROL_POINT_HANDLE: u16 = 0x0032;
pub const CONTROL_POINT_CCCD_HANDLE: u16 = 0x0033;
pub const DATA_HANDLE: u16 = 0x0035;

/// Generic "unknown" appearance.
const APPEARANCE_UNKNOWN: u16 = 0x0000;

const PROP_READ: u8 = 0x02;
const PROP_WRITE_NO_RSP: u8 = 0x04;
const PROP_WRITE: u8 = 0x08;
const PROP_NOTIFY: u8 = 0x10;
const PROP_INDICATE: u8 = 0x20;

/// Control-point values are opcode + at most one 32-bit argument.
const CONTROL_POINT_CAPACITY: u16 = 5;

// ── Record ───────────────────────────────────────────────────

/// One attribute: a handle, its type, and a fixed-capacity value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRecord {
    pub handle: u16,
    pub uuid: Uuid,
    capacity: u16,
    value: Vec<u8>,
}

impl AttributeRecord {
    pub fn new(
        handle: u16,
        uuid: Uuid,
        capacity: u16,
        initial: &[u8],
    ) -> Result<Self, AttributeError> {
        if initial.len() > capacity as usize {
            return Err(AttributeError::InvalidLength);
        }
        let mut value = Vec::with_capacity(capacity as usize);
        value.extend_from_slice(initial);
        Ok(Self {
            handle,
            uuid,
            capacity,
            value,
        })
    }

    pub fn len(&self) -> u16 {
        self.value.len() as u16
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Replace the value. The write path's own result is authoritative.
    pub fn set_value(&mut self, value: &[u8]) -> Result<(), AttributeError> {
        if value.len() > self.capacity as usize {
            return Err(AttributeError::InvalidLength);
        }
        self.value.clear();
        self.value.extend_from_slice(value);
        Ok(())
    }
}

// ── Table ────────────────────────────────────────────────────

/// Handle-ordered attribute table.
#[derive(Debug, Clone, Default)]
pub struct AttributeTable {
    records: Vec<AttributeRecord>,
}

impl AttributeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, keeping handle order. Duplicate handles are rejected.
    pub fn insert(&mut self, record: AttributeRecord) -> Result<(), AttributeError> {
        match self
            .records
            .binary_search_by_key(&record.handle, |r| r.handle)
        {
            Ok(_) => Err(AttributeError::Inconsistent),
            Err(pos) => {
                self.records.insert(pos, record);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Exact-handle lookup.
    pub fn find(&self, handle: u16) -> Option<&AttributeRecord> {
        self.records
            .binary_search_by_key(&handle, |r| r.handle)
            .ok()
            .map(|i| &self.records[i])
    }

    fn find_mut(&mut self, handle: u16) -> Option<&mut AttributeRecord> {
        self.records
            .binary_search_by_key(&handle, |r| r.handle)
            .ok()
            .map(|i| &mut self.records[i])
    }

    /// First handle in `[start, end]` whose type is `uuid`.
    pub fn find_handle_by_type(&self, start: u16, end: u16, uuid: Uuid) -> Option<u16> {
        if start > end {
            return None;
        }
        self.records
            .iter()
            .skip_while(|r| r.handle < start)
            .take_while(|r| r.handle <= end)
            .find(|r| r.uuid == uuid)
            .map(|r| r.handle)
    }

    /// Read up to `max_len` bytes starting at `offset`.
    pub fn read(&self, handle: u16, offset: u16, max_len: u16) -> Result<&[u8], AttributeError> {
        let record = self.find(handle).ok_or(AttributeError::InvalidHandle)?;
        let value = record.value();
        let offset = offset as usize;
        if offset >= value.len() {
            return Err(AttributeError::InvalidOffset);
        }
        let to_send = (max_len as usize).min(value.len() - offset);
        Ok(&value[offset..offset + to_send])
    }

    /// Store a value into the attribute with exactly this handle.
    pub fn set_value(&mut self, handle: u16, value: &[u8]) -> Result<(), AttributeError> {
        let record = self.find_mut(handle).ok_or(AttributeError::InvalidHandle)?;
        record.set_value(value)?;
        debug!("GATT: set handle 0x{:04x} ({} bytes)", handle, value.len());
        Ok(())
    }

    /// Build the GAP + OTA service table.
    pub fn ota_service(config: &OtaConfig) -> Result<Self, AttributeError> {
        let mut table = Self::new();
        let mtu = config.mtu;

        table.insert(AttributeRecord::new(
            GAP_SERVICE_HANDLE,
            Uuid::PRIMARY_SERVICE,
            2,
            &0x1800u16.to_le_bytes(),
        )?)?;
        table.insert(characteristic(
            DEVICE_NAME_HANDLE,
            PROP_READ,
            Uuid::DEVICE_NAME,
        )?)?;
        table.insert(AttributeRecord::new(
            DEVICE_NAME_HANDLE,
            Uuid::DEVICE_NAME,
            24,
            config.device_name.as_bytes(),
        )?)?;
        table.insert(characteristic(
            APPEARANCE_HANDLE,
            PROP_READ,
            Uuid::APPEARANCE,
        )?)?;
        table.insert(AttributeRecord::new(
            APPEARANCE_HANDLE,
            Uuid::APPEARANCE,
            2,
            &APPEARANCE_UNKNOWN.to_le_bytes(),
        )?)?;

        table.insert(AttributeRecord::new(
            OTA_SERVICE_HANDLE,
            Uuid::PRIMARY_SERVICE,
            16,
            &OTA_SERVICE_UUID.to_le_bytes(),
        )?)?;
        table.insert(characteristic(
            CONTROL_POINT_HANDLE,
            PROP_WRITE | PROP_NOTIFY | PROP_INDICATE,
            Uuid::Uuid128(CHAR_CONTROL_POINT_UUID),
        )?)?;
        table.insert(AttributeRecord::new(
            CONTROL_POINT_HANDLE,
            Uuid::Uuid128(CHAR_CONTROL_POINT_UUID),
            CONTROL_POINT_CAPACITY,
            &[],
        )?)?;
        table.insert(AttributeRecord::new(
            CONTROL_POINT_CCCD_HANDLE,
            Uuid::CLIENT_CHAR_CONFIG,
            2,
            &[0, 0],
        )?)?;
        table.insert(characteristic(
            DATA_HANDLE,
            PROP_WRITE | PROP_WRITE_NO_RSP,
            Uuid::Uuid128(CHAR_DATA_UUID),
        )?)?;
        table.insert(AttributeRecord::new(
            DATA_HANDLE,
            Uuid::Uuid128(CHAR_DATA_UUID),
            mtu,
            &[],
        )?)?;

        Ok(table)
    }
}

/// Characteristic declaration at `value_handle - 1`: properties, value
/// handle, then the characteristic UUID.
fn characteristic(
    value_handle: u16,
    properties: u8,
    uuid: Uuid,
) -> Result<AttributeRecord, AttributeError> {
    let mut decl: heapless::Vec<u8, 19> = heapless::Vec::new();
    let _ = decl.push(properties);
    let _ = decl.extend_from_slice(&value_handle.to_le_bytes());
    let _ = match uuid {
        Uuid::Uuid16(u) => decl.extend_from_slice(&u.to_le_bytes()),
        Uuid::Uuid128(u) => decl.extend_from_slice(&u.to_le_bytes()),
    };
    AttributeRecord::new(value_handle - 1, Uuid::CHARACTERISTIC, 19, &decl)
}
