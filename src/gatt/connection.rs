//! Per-link connection state.
//!
//! A single peripheral slot: at most one [`ConnectionContext`] exists, and a
//! second connect event simply replaces it.

use core::fmt;
use serde::{Deserialize, Serialize};

/// 6-byte Bluetooth device address, in the byte order the stack reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BdAddr(pub [u8; 6]);

impl BdAddr {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Value of the control point's client characteristic configuration
/// descriptor: which of notify / indicate the peer enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientConfig {
    #[default]
    None,
    Notify,
    Indicate,
    /// Any other bit pattern the peer wrote; kept verbatim.
    Other(u8),
}

impl ClientConfig {
    pub fn from_byte(raw: u8) -> Self {
        match raw {
            0x00 => Self::None,
            0x01 => Self::Notify,
            0x02 => Self::Indicate,
            other => Self::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::None => 0x00,
            Self::Notify => 0x01,
            Self::Indicate => 0x02,
            Self::Other(raw) => raw,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Notify => "Notify",
            Self::Indicate => "Indicate",
            Self::Other(_) => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionContext {
    pub conn_id: u16,
    pub peer: BdAddr,
    pub client_config: ClientConfig,
}

impl ConnectionContext {
    pub fn new(conn_id: u16, peer: BdAddr) -> Self {
        Self {
            conn_id,
            peer,
            client_config: ClientConfig::None,
        }
    }
}
