//! GATT server core: attribute table, request routing and the per-link
//! state a single peer connection needs.

pub mod att;
pub mod connection;
pub mod db;
pub mod dispatcher;
pub mod long_write;
pub mod notify;
