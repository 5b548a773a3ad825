//! Outbound application events.
//!
//! The [`OtaService`](super::service::OtaService) and the control point
//! emit these through the [`EventSink`](super::ports::EventSink) port.
//! Adapters on the other side decide what to do with them.

use crate::gatt::connection::BdAddr;
use crate::ota::control_point::ControlState;

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// The service has started; carries the number of restored bonds.
    Started { bonds: u8 },

    /// A peer connected to the GATT server.
    Connected { conn_id: u16, peer: BdAddr },

    /// The link dropped; `reason` is the HCI disconnect reason.
    Disconnected { conn_id: u16, reason: u8 },

    /// The control point moved between states.
    StateChanged { from: ControlState, to: ControlState },

    /// An image chunk was stored.
    DownloadProgress { written: u32, total: u32, percent: u8 },

    /// Outcome of a verify command.
    VerifyFinished { ok: bool },

    /// The device will reset into the new image after `settle_ms`.
    ResetScheduled { settle_ms: u32 },

    /// Link keys for a peer were persisted.
    BondStored(BdAddr),

    /// A peer could not bond because every slot is in use.
    BondTableFull(BdAddr),
}
