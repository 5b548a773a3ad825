//! Unified error types for the OTA service.
//!
//! Every fallible operation in the GATT and update layers funnels into
//! [`Error`]. All variants are `Copy` so they can be carried through the
//! dispatcher and logged without allocation. [`GattStatus`] is derived
//! from an `Error` at the single point where a status goes back to the
//! radio stack.

use core::fmt;

use crate::gatt::att::GattStatus;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Malformed or out-of-sequence input from the peer. Never forwarded
    /// to the update engine.
    Protocol(ProtocolViolation),
    /// An attribute lookup or value write against the table failed.
    Attribute(AttributeError),
    /// A response buffer of the requested size could not be provided.
    ResourceExhausted,
    /// The update engine reported a failure.
    Engine(EngineError),
    /// A notification or indication could not be sent.
    Transport(TransportError),
    /// Bond storage failed.
    Bond(BondError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Attribute(e) => write!(f, "attribute: {e}"),
            Self::ResourceExhausted => write!(f, "response buffer unavailable"),
            Self::Engine(e) => write!(f, "engine: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Bond(e) => write!(f, "bond: {e}"),
        }
    }
}

impl From<Error> for GattStatus {
    fn from(e: Error) -> Self {
        match e {
            Error::Protocol(ProtocolViolation::UnknownOpcode(_)) => Self::RequestNotSupported,
            Error::Attribute(AttributeError::InvalidHandle) => Self::InvalidHandle,
            Error::Attribute(AttributeError::InvalidOffset) => Self::InvalidOffset,
            Error::Attribute(AttributeError::InvalidLength) => Self::InvalidAttrLen,
            Error::Attribute(AttributeError::Inconsistent) => Self::ErrUnlikely,
            Error::ResourceExhausted => Self::InsufficientResources,
            Error::Protocol(_) | Error::Engine(_) | Error::Transport(_) | Error::Bond(_) => {
                Self::Error
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Protocol violations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Control-point write carried no opcode byte.
    EmptyCommand,
    /// Control-point opcode outside 1..=4.
    UnknownOpcode(u8),
    /// Command payload shorter than its fixed encoding.
    ShortPayload { opcode: u8, len: usize },
    /// Verify must be exactly opcode + 4 CRC bytes.
    BadVerifyLength(usize),
    /// Command not accepted in the current control-point state.
    UnexpectedCommand { opcode: u8 },
    /// Prepare-write offset did not continue the sequence.
    OutOfOrderChunk { expected: u16, got: u16 },
    /// Prepare-write chunk would overrun the long-write buffer.
    ChunkOverflow { written: u16, len: usize },
    /// Execute-write with no prepared sequence.
    NoPreparedWrite,
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCommand => write!(f, "empty control-point write"),
            Self::UnknownOpcode(op) => write!(f, "unknown control opcode {op}"),
            Self::ShortPayload { opcode, len } => {
                write!(f, "opcode {opcode} payload too short ({len} bytes)")
            }
            Self::BadVerifyLength(len) => write!(f, "verify payload must be 5 bytes, got {len}"),
            Self::UnexpectedCommand { opcode } => {
                write!(f, "opcode {opcode} not valid in current state")
            }
            Self::OutOfOrderChunk { expected, got } => {
                write!(f, "prepare-write offset {got}, expected {expected}")
            }
            Self::ChunkOverflow { written, len } => {
                write!(f, "prepare-write of {len} bytes overruns buffer at {written}")
            }
            Self::NoPreparedWrite => write!(f, "execute-write without prepared data"),
        }
    }
}

impl From<ProtocolViolation> for Error {
    fn from(e: ProtocolViolation) -> Self {
        Self::Protocol(e)
    }
}

// ---------------------------------------------------------------------------
// Attribute table errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeError {
    InvalidHandle,
    InvalidOffset,
    /// Value longer than the attribute's capacity.
    InvalidLength,
    /// The stack found a handle the table does not know.
    Inconsistent,
}

impl fmt::Display for AttributeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHandle => write!(f, "no attribute with that handle"),
            Self::InvalidOffset => write!(f, "offset beyond attribute length"),
            Self::InvalidLength => write!(f, "value exceeds attribute capacity"),
            Self::Inconsistent => write!(f, "attribute table inconsistent"),
        }
    }
}

impl From<AttributeError> for Error {
    fn from(e: AttributeError) -> Self {
        Self::Attribute(e)
    }
}

// ---------------------------------------------------------------------------
// Update engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// Agent could not be started (bad context or already running).
    StartFailed,
    /// Operation not valid in the engine's current state.
    InvalidState,
    /// Declared image size is zero or larger than the partition.
    InvalidSize,
    /// No inactive partition to write into.
    NoPartition,
    /// Chunk offset does not match the bytes already written.
    NonSequential,
    /// Chunk would exceed the declared image size.
    Overflow,
    /// Storage write failed.
    WriteFailed,
    /// Verify requested before every byte arrived.
    IncompleteTransfer,
    /// CRC over the received image did not match.
    CrcMismatch,
    /// Image could not be marked bootable.
    BootSetFailed,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartFailed => write!(f, "update agent start failed"),
            Self::InvalidState => write!(f, "operation invalid in current session state"),
            Self::InvalidSize => write!(f, "image size out of range"),
            Self::NoPartition => write!(f, "no inactive OTA partition available"),
            Self::NonSequential => write!(f, "chunk offset does not match bytes written"),
            Self::Overflow => write!(f, "chunk would exceed declared image size"),
            Self::WriteFailed => write!(f, "image write failed"),
            Self::IncompleteTransfer => write!(f, "verify before all bytes written"),
            Self::CrcMismatch => write!(f, "image CRC mismatch"),
            Self::BootSetFailed => write!(f, "set boot partition failed"),
        }
    }
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// No peer is connected.
    NotConnected,
    /// The stack refused the notification or indication.
    SendFailed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "no peer connected"),
            Self::SendFailed => write!(f, "stack rejected send"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Bond storage errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondError {
    /// Every slot is in use; the peer cannot bond.
    TableFull,
    /// No stored keys for the requested address.
    NotFound,
    /// No local identity keys have been stored yet.
    NoIdentityKeys,
    /// Persisting to non-volatile storage failed.
    Storage,
    /// A stored record could not be decoded.
    Corrupted,
}

impl fmt::Display for BondError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TableFull => write!(f, "bond table full"),
            Self::NotFound => write!(f, "peer not bonded"),
            Self::NoIdentityKeys => write!(f, "no local identity keys"),
            Self::Storage => write!(f, "bond storage write failed"),
            Self::Corrupted => write!(f, "stored bond record corrupted"),
        }
    }
}

impl From<BondError> for Error {
    fn from(e: BondError) -> Self {
        Self::Bond(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, Error>;
