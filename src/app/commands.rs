//! Inbound security-manager events and the replies the service gives.
//!
//! The BLE adapter translates each Bluedroid GAP/security callback into a
//! [`ManagementEvent`] and hands it to
//! [`OtaService::handle_management_event`](super::service::OtaService::handle_management_event).
//! The match there is exhaustive: a new stack event means a new variant.

use crate::bonding::{IdentityKeys, LinkKeys};
use crate::error::BondError;
use crate::gatt::connection::BdAddr;

/// IO capability: the device has neither display nor keyboard.
pub const IO_CAP_NONE: u8 = 0x03;
/// Authentication requirements: bonding + MITM protection.
pub const AUTH_REQ_BOND_MITM: u8 = 0x05;
/// Key distribution bits.
pub const KEY_DIST_ENC: u8 = 0x01;
pub const KEY_DIST_ID: u8 = 0x02;
pub const MAX_KEY_SIZE: u8 = 16;

/// Security and advertising events from the radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagementEvent {
    /// Peer started pairing and asks what we can do.
    PairingIoCapsRequest { peer: BdAddr },
    /// Peer asked for the link to be secured.
    SecurityRequest { peer: BdAddr },
    PairingComplete { peer: BdAddr, success: bool },
    EncryptionStatus { peer: BdAddr, encrypted: bool },
    /// Fresh keys after pairing; persist them.
    LinkKeysUpdated(LinkKeys),
    /// Stack needs keys for a reconnecting peer.
    LinkKeysRequested(BdAddr),
    LocalIdentityKeysUpdated(IdentityKeys),
    LocalIdentityKeysRequested,
    AdvertisingStateChanged { on: bool },
    ConnectionParamsUpdated {
        peer: BdAddr,
        interval: u16,
        latency: u16,
        timeout: u16,
    },
}

/// Pairing parameters offered in reply to an IO-capabilities request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoCapabilities {
    pub io_cap: u8,
    pub auth_req: u8,
    pub max_key_size: u8,
    pub init_keys: u8,
    pub resp_keys: u8,
}

impl Default for IoCapabilities {
    fn default() -> Self {
        Self {
            io_cap: IO_CAP_NONE,
            auth_req: AUTH_REQ_BOND_MITM,
            max_key_size: MAX_KEY_SIZE,
            init_keys: KEY_DIST_ENC | KEY_DIST_ID,
            resp_keys: KEY_DIST_ENC | KEY_DIST_ID,
        }
    }
}

/// What the adapter should tell the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagementReply {
    IoCaps(IoCapabilities),
    SecurityGranted,
    LinkKeys(LinkKeys),
    IdentityKeys(IdentityKeys),
    /// Event consumed; nothing to hand back.
    Ack,
    /// Report failure to the stack. For a key request this makes the
    /// link layer generate fresh keys.
    Failed(BondError),
}

impl ManagementReply {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}
