//! BLE OTA firmware library.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod bonding;
pub mod config;
pub mod error;
pub mod gatt;
pub mod ota;

// The adapters carry host simulation backends, so the crate builds and
// tests off-target.
pub mod adapters;
