//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements         | Connects to                  |
//! |----------------|--------------------|------------------------------|
//! | `ble`          | LinkPort           | Bluedroid GATT server        |
//! | `log_sink`     | EventSink          | Serial log output            |
//! | `nvs`          | ConfigPort         | NVS / in-memory store        |
//! |                | StoragePort        |                              |
//! | `system`       | ResetPort          | Main task, `esp_ota::restart`|

pub mod ble;
pub mod log_sink;
pub mod nvs;
pub mod system;
