//! Queued-write reassembly (ATT Prepare Write / Execute Write).
//!
//! Values longer than one MTU arrive as a sequence of prepared chunks and
//! are committed together by an execute-write:
//!
//! ```text
//! PrepareWrite(h, 0,   c0) ─┐
//! PrepareWrite(h, n0,  c1) ─┤  chunks must be contiguous, in order
//! PrepareWrite(h, n01, c2) ─┘
//! ExecuteWrite             ──▶ (h, c0 ‖ c1 ‖ c2) through the normal write path
//! ```
//!
//! A single buffer exists per server. It is session-scoped: the dispatcher
//! clears it on disconnect so a reconnecting peer never inherits a stale
//! partial sequence.

use log::{debug, warn};

use crate::error::ProtocolViolation;
use crate::gatt::att::{ATT_MAX_VALUE_LEN, AttValue};

pub struct LongWriteBuffer {
    value: AttValue,
    written: u16,
    target_handle: u16,
    active: bool,
    capacity: u16,
}

impl LongWriteBuffer {
    /// `capacity` is clamped to [`ATT_MAX_VALUE_LEN`].
    pub fn new(capacity: u16) -> Self {
        Self {
            value: AttValue::new(),
            written: 0,
            target_handle: 0,
            active: false,
            capacity: capacity.min(ATT_MAX_VALUE_LEN as u16),
        }
    }

    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    pub fn written(&self) -> u16 {
        self.written
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn target_handle(&self) -> Option<u16> {
        self.active.then_some(self.target_handle)
    }

    /// Drop any in-flight sequence.
    pub fn clear(&mut self) {
        if self.active {
            debug!(
                "GATT: discarding long write to 0x{:04x} ({} bytes)",
                self.target_handle, self.written
            );
        }
        self.value.clear();
        self.written = 0;
        self.target_handle = 0;
        self.active = false;
    }

    /// Queue one chunk. Returns the echo owed to the peer.
    ///
    /// A rejected chunk leaves the buffer exactly as it was.
    pub fn prepare(
        &mut self,
        handle: u16,
        offset: u16,
        chunk: &[u8],
    ) -> Result<AttValue, ProtocolViolation> {
        let written = if self.active { self.written } else { 0 };

        if offset != written {
            warn!(
                "GATT: prepare-write to 0x{:04x} at {}, expected {}",
                handle, offset, written
            );
            return Err(ProtocolViolation::OutOfOrderChunk {
                expected: written,
                got: offset,
            });
        }

        if written as usize + chunk.len() > self.capacity as usize {
            warn!(
                "GATT: prepare-write of {} bytes overruns {}-byte buffer",
                chunk.len(),
                self.capacity
            );
            return Err(ProtocolViolation::ChunkOverflow {
                written,
                len: chunk.len(),
            });
        }

        if !self.active {
            self.value.clear();
            self.written = 0;
            self.target_handle = handle;
            self.active = true;
        }

        // Capacity check above keeps both copies in bounds.
        let mut echo = AttValue::new();
        if self.value.extend_from_slice(chunk).is_err() || echo.extend_from_slice(chunk).is_err() {
            return Err(ProtocolViolation::ChunkOverflow {
                written: self.written,
                len: chunk.len(),
            });
        }
        self.written += chunk.len() as u16;
        debug!(
            "GATT: prepare-write 0x{:04x} offset {} len {} (total {})",
            handle,
            offset,
            chunk.len(),
            self.written
        );
        Ok(echo)
    }

    /// Hand out the reassembled `(handle, value)` and clear the buffer.
    ///
    /// The buffer is cleared whether or not a sequence was active.
    pub fn take(&mut self) -> Result<(u16, AttValue), ProtocolViolation> {
        if !self.active {
            self.clear();
            return Err(ProtocolViolation::NoPreparedWrite);
        }
        let handle = self.target_handle;
        let value = core::mem::take(&mut self.value);
        self.clear();
        Ok((handle, value))
    }
}
