//! Firmware update over the control point.
//!
//! [`command`] decodes control-point writes, [`control_point`] sequences
//! them, and [`engine`] writes the image to the inactive OTA partition.

pub mod command;
pub mod control_point;
pub mod engine;
