//! OTA service configuration
//!
//! Tunable parameters for the GATT server and update flow.
//! Values can be overridden via NVS (non-volatile storage).

use serde::{Deserialize, Serialize};

/// Core service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaConfig {
    // --- GAP ---
    /// Advertised device name
    pub device_name: heapless::String<24>,
    /// Advertising interval lower bound (units of 0.625 ms)
    pub adv_interval_min: u16,
    /// Advertising interval upper bound (units of 0.625 ms)
    pub adv_interval_max: u16,

    // --- ATT ---
    /// Server MTU offered on exchange; also the long-write capacity
    pub mtu: u16,

    // --- Update flow ---
    /// Reset into the new image once the peer confirms the verify indication
    pub reboot_at_end: bool,
    /// Delay between the confirmation and the reset (milliseconds)
    pub reset_settle_ms: u32,
    /// Largest image the engine accepts (bytes)
    pub max_image_size: u32,
}

impl Default for OtaConfig {
    fn default() -> Self {
        let mut device_name = heapless::String::new();
        let _ = device_name.push_str("OTA-BLE");
        Self {
            device_name,
            adv_interval_min: 0x20, // 20 ms
            adv_interval_max: 0x40, // 40 ms

            mtu: 512,

            reboot_at_end: true,
            reset_settle_ms: 1000,
            max_image_size: 4 * 1024 * 1024, // 4 MB
        }
    }
}
