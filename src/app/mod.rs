//! Application core: pure domain logic, zero I/O.
//!
//! The OTA session object lives here together with the vocabulary it
//! speaks to the outside world. All interaction with the radio, flash and
//! NVS happens through **port traits** defined in [`ports`], keeping this
//! layer fully testable without real hardware.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
