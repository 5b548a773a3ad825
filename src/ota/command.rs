//! Control-point wire format.
//!
//! ```text
//! ┌────────┬───────────────────────────┐
//! │ opcode │ argument (LE, optional)   │
//! │  (1B)  │ 0 or 4 bytes              │
//! └────────┴───────────────────────────┘
//! ```
//!
//! | Opcode | Command  | Argument         |
//! |--------|----------|------------------|
//! | 1      | Prepare  | -                |
//! | 2      | Download | total image size |
//! | 3      | Verify   | CRC-32 of image  |
//! | 4      | Abort    | -                |
//!
//! Replies are a single [`UpgradeStatus`] byte.

use crate::error::ProtocolViolation;

pub const OPCODE_PREPARE: u8 = 1;
pub const OPCODE_DOWNLOAD: u8 = 2;
pub const OPCODE_VERIFY: u8 = 3;
pub const OPCODE_ABORT: u8 = 4;

/// Opcode plus one 32-bit argument.
const ARG_COMMAND_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Prepare,
    Download { total_size: u32 },
    Verify { crc32: u32 },
    Abort,
}

impl ControlCommand {
    /// Decode a control-point write.
    ///
    /// `Download` needs at least the opcode and all four size bytes.
    /// `Verify` must be exactly opcode + CRC.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolViolation> {
        let (&opcode, _) = payload
            .split_first()
            .ok_or(ProtocolViolation::EmptyCommand)?;

        match opcode {
            OPCODE_PREPARE => Ok(Self::Prepare),
            OPCODE_DOWNLOAD => {
                if payload.len() < ARG_COMMAND_LEN {
                    return Err(ProtocolViolation::ShortPayload {
                        opcode,
                        len: payload.len(),
                    });
                }
                Ok(Self::Download {
                    total_size: read_u32_le(&payload[1..ARG_COMMAND_LEN]),
                })
            }
            OPCODE_VERIFY => {
                if payload.len() != ARG_COMMAND_LEN {
                    return Err(ProtocolViolation::BadVerifyLength(payload.len()));
                }
                Ok(Self::Verify {
                    crc32: read_u32_le(&payload[1..ARG_COMMAND_LEN]),
                })
            }
            OPCODE_ABORT => Ok(Self::Abort),
            other => Err(ProtocolViolation::UnknownOpcode(other)),
        }
    }

    pub fn opcode(self) -> u8 {
        match self {
            Self::Prepare => OPCODE_PREPARE,
            Self::Download { .. } => OPCODE_DOWNLOAD,
            Self::Verify { .. } => OPCODE_VERIFY,
            Self::Abort => OPCODE_ABORT,
        }
    }

    /// Wire form, as a host would send it.
    pub fn encode(self) -> heapless::Vec<u8, ARG_COMMAND_LEN> {
        let mut out = heapless::Vec::new();
        let _ = out.push(self.opcode());
        match self {
            Self::Download { total_size: arg } | Self::Verify { crc32: arg } => {
                let _ = out.extend_from_slice(&arg.to_le_bytes());
            }
            Self::Prepare | Self::Abort => {}
        }
        out
    }
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// One-byte status sent back on the control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UpgradeStatus {
    Ok = 0,
    Bad = 1,
}

impl UpgradeStatus {
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}
