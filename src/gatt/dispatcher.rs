//! GATT request dispatcher.
//!
//! One entry point per request: the transport hands in a decoded
//! [`GattRequest`] and gets back either an [`AttResponse`] to put on the air
//! or the [`GattStatus`] to send as an error response.
//!
//! ```text
//!  GattRequest ──▶ GattDispatcher ─┬─▶ AttributeTable       (reads, generic writes)
//!                                  ├─▶ LongWriteBuffer      (prepare / execute)
//!                                  └─▶ ControlPoint ──▶ UpdateEngine
//!                                                    └──▶ StatusEmitter ──▶ LinkPort
//! ```

use log::{debug, info, warn};

use crate::app::ports::{EventSink, LinkPort, Ports, ResetPort, UpdateEngine};
use crate::config::OtaConfig;
use crate::error::{AttributeError, Error};
use crate::gatt::att::{ATT_MAX_VALUE_LEN, AttResponse, AttValue, GattRequest, GattStatus, Uuid};
use crate::gatt::connection::{BdAddr, ClientConfig, ConnectionContext};
use crate::gatt::db::{
    AttributeTable, CONTROL_POINT_CCCD_HANDLE, CONTROL_POINT_HANDLE, DATA_HANDLE,
};
use crate::gatt::long_write::LongWriteBuffer;
use crate::ota::control_point::ControlPoint;

/// Largest value a read-by-type pair can carry (pair length is one byte).
const MAX_PAIR_VALUE_LEN: usize = 253;

pub struct GattDispatcher {
    table: AttributeTable,
    long_write: LongWriteBuffer,
    control: ControlPoint,
    conn: Option<ConnectionContext>,
    mtu: u16,
}

impl GattDispatcher {
    pub fn new(table: AttributeTable, config: &OtaConfig) -> Self {
        Self {
            table,
            long_write: LongWriteBuffer::new(config.mtu),
            control: ControlPoint::new(config),
            conn: None,
            mtu: config.mtu,
        }
    }

    pub fn table(&self) -> &AttributeTable {
        &self.table
    }

    pub fn control(&self) -> &ControlPoint {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut ControlPoint {
        &mut self.control
    }

    pub fn long_write(&self) -> &LongWriteBuffer {
        &self.long_write
    }

    pub fn connection(&self) -> Option<&ConnectionContext> {
        self.conn.as_ref()
    }

    // ── Link events ───────────────────────────────────────────

    /// Record the peer. A second connect replaces the first.
    pub fn on_connected(&mut self, conn_id: u16, peer: BdAddr) {
        if let Some(old) = self.conn {
            warn!(
                "GATT: connection {} replaced by {} ({})",
                old.conn_id, conn_id, peer
            );
        }
        info!("GATT: connected {} (conn_id {})", peer, conn_id);
        self.conn = Some(ConnectionContext::new(conn_id, peer));
    }

    /// Drop per-link state, including any half-finished long write. A
    /// disconnect for a link that was already replaced is ignored.
    pub fn on_disconnected(&mut self, conn_id: u16, reason: u8) {
        if let Some(current) = self.conn.filter(|c| c.conn_id != conn_id) {
            warn!(
                "GATT: stale disconnect for conn_id {} (current {})",
                conn_id, current.conn_id
            );
            return;
        }
        info!(
            "GATT: disconnected conn_id {} (reason 0x{:02x})",
            conn_id, reason
        );
        self.conn = None;
        self.long_write.clear();
        if let Err(e) = self.table.set_value(CONTROL_POINT_CCCD_HANDLE, &[0, 0]) {
            warn!("GATT: could not reset CCCD: {}", e);
        }
    }

    // ── Requests ──────────────────────────────────────────────

    /// Route one attribute request.
    pub fn handle(
        &mut self,
        conn_id: u16,
        request: &GattRequest<'_>,
        io: &mut Ports<'_, impl UpdateEngine, impl LinkPort, impl ResetPort, impl EventSink>,
    ) -> Result<AttResponse, GattStatus> {
        let result = match *request {
            GattRequest::Read {
                handle,
                offset,
                max_len,
            } => self.read(handle, offset, max_len),
            GattRequest::ReadByType {
                start,
                end,
                uuid,
                max_len,
            } => self.read_by_type(start, end, uuid, max_len),
            GattRequest::ReadMultiple {
                handles,
                variable,
                max_len,
            } => self.read_multiple(handles, variable, max_len),
            GattRequest::Write {
                handle,
                offset,
                value,
                kind,
            } => self
                .write(conn_id, handle, offset, value, io)
                .map(|()| {
                    if kind.needs_response() {
                        AttResponse::WriteAck
                    } else {
                        AttResponse::None
                    }
                }),
            GattRequest::PrepareWrite {
                handle,
                offset,
                value,
            } => self
                .long_write
                .prepare(handle, offset, value)
                .map(|echo| AttResponse::PrepareWriteAck {
                    handle,
                    offset,
                    value: echo,
                })
                .map_err(Error::from),
            GattRequest::ExecuteWrite { commit } => self.execute_write(conn_id, commit, io),
            GattRequest::ExchangeMtu { client_mtu } => {
                info!(
                    "GATT: MTU exchange, peer {} / server {}",
                    client_mtu, self.mtu
                );
                Ok(AttResponse::Mtu(self.mtu))
            }
            GattRequest::ValueConfirmation => {
                self.control.on_value_confirmation(io);
                Ok(AttResponse::None)
            }
            GattRequest::NotificationSent => {
                debug!("GATT: peer received notification");
                Ok(AttResponse::None)
            }
            GattRequest::Unsupported { opcode } => {
                warn!("GATT: unsupported opcode 0x{:02x}", opcode);
                return Err(GattStatus::RequestNotSupported);
            }
        };

        result.map_err(|e| {
            let status = GattStatus::from(e);
            warn!(
                "GATT: opcode 0x{:02x} handle 0x{:04x} failed: {} -> {}",
                request.opcode(),
                request.handle(),
                e,
                status
            );
            status
        })
    }

    fn read(&self, handle: u16, offset: u16, max_len: u16) -> Result<AttResponse, Error> {
        let bytes = self.table.read(handle, offset, max_len)?;
        let mut out = AttValue::new();
        out.extend_from_slice(bytes)
            .map_err(|()| Error::ResourceExhausted)?;
        Ok(AttResponse::Read(out))
    }

    /// `(handle LE, value)` pairs of one size for every attribute of `uuid`
    /// in `[start, end]`, until the response is full.
    fn read_by_type(
        &self,
        start: u16,
        end: u16,
        uuid: Uuid,
        max_len: u16,
    ) -> Result<AttResponse, Error> {
        let room = response_room(max_len)?;
        let mut data = AttValue::new();
        let mut pair_len: usize = 0;
        let mut next = start;

        while let Some(handle) = self.table.find_handle_by_type(next, end, uuid) {
            let record = self
                .table
                .find(handle)
                .ok_or(AttributeError::Inconsistent)?;
            let value = record.value();

            if pair_len == 0 {
                if room < 2 {
                    break;
                }
                let fit = (room - 2).min(MAX_PAIR_VALUE_LEN);
                pair_len = 2 + value.len().min(fit);
            } else if 2 + value.len() != pair_len || data.len() + pair_len > room {
                break;
            }

            let value_len = pair_len - 2;
            data.extend_from_slice(&handle.to_le_bytes())
                .and_then(|()| data.extend_from_slice(&value[..value_len]))
                .map_err(|()| Error::ResourceExhausted)?;

            match handle.checked_add(1) {
                Some(h) if h <= end => next = h,
                _ => break,
            }
        }

        if data.is_empty() {
            return Err(AttributeError::InvalidHandle.into());
        }
        Ok(AttResponse::ReadByType {
            pair_len: pair_len as u8,
            data,
        })
    }

    /// Values of `handles` back to back; the last one is cut to fit.
    fn read_multiple(
        &self,
        handles: &[u16],
        variable: bool,
        max_len: u16,
    ) -> Result<AttResponse, Error> {
        let room = response_room(max_len)?;
        let mut data = AttValue::new();

        for &handle in handles {
            let Some(record) = self.table.find(handle) else {
                warn!("GATT: read-multiple has no handle 0x{:04x}", handle);
                return Err(AttributeError::Inconsistent.into());
            };
            let value = record.value();
            let header = if variable { 2 } else { 0 };
            let left = room - data.len();
            if left <= header {
                break;
            }
            let take = value.len().min(left - header);
            if variable {
                data.extend_from_slice(&(value.len() as u16).to_le_bytes())
                    .map_err(|()| Error::ResourceExhausted)?;
            }
            data.extend_from_slice(&value[..take])
                .map_err(|()| Error::ResourceExhausted)?;
            if take < value.len() {
                break;
            }
        }

        if data.is_empty() {
            return Err(AttributeError::InvalidHandle.into());
        }
        Ok(AttResponse::ReadMultiple(data))
    }

    /// The single write path, shared by write requests, write commands and
    /// committed long writes.
    fn write(
        &mut self,
        conn_id: u16,
        handle: u16,
        offset: u16,
        value: &[u8],
        io: &mut Ports<'_, impl UpdateEngine, impl LinkPort, impl ResetPort, impl EventSink>,
    ) -> Result<(), Error> {
        debug!(
            "GATT: write 0x{:04x} offset {} len {}",
            handle,
            offset,
            value.len()
        );
        match handle {
            CONTROL_POINT_CCCD_HANDLE => {
                let Some(&raw) = value.first() else {
                    return Err(AttributeError::InvalidLength.into());
                };
                let config = ClientConfig::from_byte(raw);
                info!("GATT: control point CCCD = {} ({})", raw, config.name());
                self.table.set_value(handle, &[raw, 0])?;
                if let Some(ctx) = self.conn.as_mut() {
                    ctx.client_config = config;
                }
                Ok(())
            }
            CONTROL_POINT_HANDLE => self.control.on_command(conn_id, value, io),
            DATA_HANDLE => self.control.on_data(value, offset, io),
            _ => Ok(self.table.set_value(handle, value)?),
        }
    }

    fn execute_write(
        &mut self,
        conn_id: u16,
        commit: bool,
        io: &mut Ports<'_, impl UpdateEngine, impl LinkPort, impl ResetPort, impl EventSink>,
    ) -> Result<AttResponse, Error> {
        if !commit {
            info!("GATT: prepared writes cancelled");
            self.long_write.clear();
            return Ok(AttResponse::ExecuteWriteAck);
        }

        let (handle, value) = self.long_write.take()?;
        info!(
            "GATT: execute write of {} bytes to 0x{:04x}",
            value.len(),
            handle
        );
        self.write(conn_id, handle, 0, &value, io)?;
        Ok(AttResponse::ExecuteWriteAck)
    }
}

/// Response space the stack offered, checked against what we can build.
fn response_room(max_len: u16) -> Result<usize, Error> {
    let room = max_len as usize;
    if room > ATT_MAX_VALUE_LEN {
        warn!("GATT: no {}-byte response buffer", room);
        return Err(Error::ResourceExhausted);
    }
    Ok(room)
}
