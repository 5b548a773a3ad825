//! ATT protocol vocabulary: opcodes, statuses, and the tagged request and
//! response types the dispatcher consumes and produces.
//!
//! The radio stack adapter decodes whatever its vendor callback delivers
//! into a [`GattEvent`]; everything downstream matches on these enums
//! exhaustively.

use core::fmt;

/// Largest attribute value / response payload this server ever produces.
pub const ATT_MAX_VALUE_LEN: usize = 512;

/// Default ATT MTU before any exchange (Bluetooth Core v5.3, Vol 3 Part F 3.2.8).
pub const ATT_DEFAULT_MTU: u16 = 23;

/// Fixed-capacity byte buffer used for every response payload.
pub type AttValue = heapless::Vec<u8, ATT_MAX_VALUE_LEN>;

// ── Opcodes ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttOpcode {
    ExchangeMtuReq = 0x02,
    ReadByTypeReq = 0x08,
    ReadReq = 0x0A,
    ReadBlobReq = 0x0C,
    ReadMultipleReq = 0x0E,
    WriteReq = 0x12,
    PrepareWriteReq = 0x16,
    ExecuteWriteReq = 0x18,
    HandleValueNotif = 0x1B,
    HandleValueConf = 0x1E,
    ReadMultipleVariableReq = 0x20,
    WriteCmd = 0x52,
    SignedWriteCmd = 0xD2,
}

impl AttOpcode {
    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0x02 => Self::ExchangeMtuReq,
            0x08 => Self::ReadByTypeReq,
            0x0A => Self::ReadReq,
            0x0C => Self::ReadBlobReq,
            0x0E => Self::ReadMultipleReq,
            0x12 => Self::WriteReq,
            0x16 => Self::PrepareWriteReq,
            0x18 => Self::ExecuteWriteReq,
            0x1B => Self::HandleValueNotif,
            0x1E => Self::HandleValueConf,
            0x20 => Self::ReadMultipleVariableReq,
            0x52 => Self::WriteCmd,
            0xD2 => Self::SignedWriteCmd,
            _ => return None,
        })
    }
}

// ── Status codes ──────────────────────────────────────────────

/// Status returned to the radio stack for every attribute request.
///
/// Values are the on-air ATT error codes, plus the vendor-range generic
/// `Error` (0x85) most stacks use for application-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GattStatus {
    Success = 0x00,
    InvalidHandle = 0x01,
    RequestNotSupported = 0x06,
    InvalidOffset = 0x07,
    InvalidAttrLen = 0x0D,
    ErrUnlikely = 0x0E,
    InsufficientResources = 0x11,
    Error = 0x85,
}

impl GattStatus {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::InvalidHandle => write!(f, "invalid handle"),
            Self::RequestNotSupported => write!(f, "request not supported"),
            Self::InvalidOffset => write!(f, "invalid offset"),
            Self::InvalidAttrLen => write!(f, "invalid attribute value length"),
            Self::ErrUnlikely => write!(f, "unlikely error"),
            Self::InsufficientResources => write!(f, "insufficient resources"),
            Self::Error => write!(f, "GATT error"),
        }
    }
}

// ── UUIDs ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uuid {
    Uuid16(u16),
    Uuid128(u128),
}

impl Uuid {
    /// Primary service declaration.
    pub const PRIMARY_SERVICE: Self = Self::Uuid16(0x2800);
    /// Characteristic declaration.
    pub const CHARACTERISTIC: Self = Self::Uuid16(0x2803);
    /// Client characteristic configuration descriptor.
    pub const CLIENT_CHAR_CONFIG: Self = Self::Uuid16(0x2902);
    /// GAP device name characteristic.
    pub const DEVICE_NAME: Self = Self::Uuid16(0x2A00);
    /// GAP appearance characteristic.
    pub const APPEARANCE: Self = Self::Uuid16(0x2A01);
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid16(u) => write!(f, "0x{:04x}", u),
            Self::Uuid128(u) => write!(f, "{:032x}", u),
        }
    }
}

// ── Requests ──────────────────────────────────────────────────

/// Which flavour of write a [`GattRequest::Write`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// ATT Write Request: a write response is owed on success.
    Request,
    /// ATT Write Command: fire-and-forget.
    Command,
    /// Signed Write Command: fire-and-forget, signature checked by the stack.
    SignedCommand,
}

impl WriteKind {
    pub const fn needs_response(self) -> bool {
        matches!(self, Self::Request)
    }
}

/// One attribute request as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattRequest<'a> {
    /// Read / Read Blob. `max_len` is the response room the stack offers.
    Read {
        handle: u16,
        offset: u16,
        max_len: u16,
    },
    ReadByType {
        start: u16,
        end: u16,
        uuid: Uuid,
        max_len: u16,
    },
    /// Read Multiple (fixed) or Read Multiple Variable Length.
    ReadMultiple {
        handles: &'a [u16],
        variable: bool,
        max_len: u16,
    },
    Write {
        handle: u16,
        offset: u16,
        value: &'a [u8],
        kind: WriteKind,
    },
    PrepareWrite {
        handle: u16,
        offset: u16,
        value: &'a [u8],
    },
    /// `commit == false` is the "cancel all prepared writes" flag.
    ExecuteWrite { commit: bool },
    ExchangeMtu { client_mtu: u16 },
    /// Peer acknowledged an indication.
    ValueConfirmation,
    /// Stack reports a notification left the controller.
    NotificationSent,
    /// An opcode this server does not implement.
    Unsupported { opcode: u8 },
}

impl GattRequest<'_> {
    /// The opcode an error response for this request should carry.
    pub fn opcode(&self) -> u8 {
        let op = match self {
            Self::Read { offset: 0, .. } => AttOpcode::ReadReq,
            Self::Read { .. } => AttOpcode::ReadBlobReq,
            Self::ReadByType { .. } => AttOpcode::ReadByTypeReq,
            Self::ReadMultiple { variable: false, .. } => AttOpcode::ReadMultipleReq,
            Self::ReadMultiple { variable: true, .. } => AttOpcode::ReadMultipleVariableReq,
            Self::Write {
                kind: WriteKind::Request,
                ..
            } => AttOpcode::WriteReq,
            Self::Write {
                kind: WriteKind::Command,
                ..
            } => AttOpcode::WriteCmd,
            Self::Write {
                kind: WriteKind::SignedCommand,
                ..
            } => AttOpcode::SignedWriteCmd,
            Self::PrepareWrite { .. } => AttOpcode::PrepareWriteReq,
            Self::ExecuteWrite { .. } => AttOpcode::ExecuteWriteReq,
            Self::ExchangeMtu { .. } => AttOpcode::ExchangeMtuReq,
            Self::ValueConfirmation => AttOpcode::HandleValueConf,
            Self::NotificationSent => AttOpcode::HandleValueNotif,
            Self::Unsupported { opcode } => return *opcode,
        };
        op as u8
    }

    /// The handle an error response for this request should carry.
    pub fn handle(&self) -> u16 {
        match self {
            Self::Read { handle, .. }
            | Self::Write { handle, .. }
            | Self::PrepareWrite { handle, .. } => *handle,
            Self::ReadByType { start, .. } => *start,
            Self::ReadMultiple { handles, .. } => handles.first().copied().unwrap_or(0),
            Self::ExecuteWrite { .. }
            | Self::ExchangeMtu { .. }
            | Self::ValueConfirmation
            | Self::NotificationSent
            | Self::Unsupported { .. } => 0,
        }
    }
}

// ── Responses ─────────────────────────────────────────────────

/// Successful outcome of a request, for the adapter to put on the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttResponse {
    Read(AttValue),
    /// `data` holds `pair_len`-sized `(handle LE, value)` elements.
    ReadByType { pair_len: u8, data: AttValue },
    ReadMultiple(AttValue),
    /// Write Request succeeded: send a write response.
    WriteAck,
    /// Echo of an accepted prepare-write chunk.
    PrepareWriteAck {
        handle: u16,
        offset: u16,
        value: AttValue,
    },
    ExecuteWriteAck,
    Mtu(u16),
    /// Nothing goes back to the peer (commands, confirmations).
    None,
}

/// Everything the transport hands to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent<'a> {
    Connected {
        conn_id: u16,
        peer: crate::gatt::connection::BdAddr,
    },
    Disconnected {
        conn_id: u16,
        reason: u8,
    },
    Request {
        conn_id: u16,
        request: GattRequest<'a>,
    },
}
