//! OTA control-point state machine.
//!
//! ```text
//!          Prepare            Download            Verify
//!  Idle ───────────▶ Preparing ───────▶ Downloading ──────▶ Verifying ─┬─▶ Complete
//!   ▲                                        ▲                         └─▶ Failed
//!   │                                        └──────── Verify ─────────────┘
//!   └── Abort (any state; mid-session lands in Aborted, which accepts Prepare)
//! ```
//!
//! A failed session survives the peer's confirmation of the BAD indication:
//! the host may send Verify again, or Prepare to start over.
//!
//! Commands are decoded and checked against the current state before the
//! engine sees them. The engine keeps its own guards; this machine only
//! decides which calls are worth making and what to tell the peer.

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::{
    ConnectionType, EventSink, LinkPort, Ports, ResetPort, SessionState, UpdateEngine,
};
use crate::config::OtaConfig;
use crate::error::{EngineError, Error, ProtocolViolation, Result};
use crate::gatt::notify::StatusEmitter;

use super::command::{ControlCommand, UpgradeStatus};

/// Tag carried by a live application context.
pub const CONTEXT_TAG_VALID: u32 = 0x51ED_BA15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlState {
    Idle = 0,
    Preparing = 1,
    Downloading = 2,
    Verifying = 3,
    Complete = 4,
    Failed = 5,
    Aborted = 6,
}

impl ControlState {
    /// States in which a new session may be prepared.
    fn accepts_prepare(self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Aborted | Self::Preparing | Self::Failed
        )
    }

    fn in_session(self) -> bool {
        matches!(self, Self::Preparing | Self::Downloading | Self::Verifying)
    }
}

pub struct ControlPoint {
    state: ControlState,
    tag: u32,
    connection: ConnectionType,
    reboot_at_end: bool,
    settle_ms: u32,
    emitter: StatusEmitter,
}

impl ControlPoint {
    pub fn new(config: &OtaConfig) -> Self {
        Self {
            state: ControlState::Idle,
            tag: CONTEXT_TAG_VALID,
            connection: ConnectionType::None,
            reboot_at_end: config.reboot_at_end,
            settle_ms: config.reset_settle_ms,
            emitter: StatusEmitter::default(),
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn connection(&self) -> ConnectionType {
        self.connection
    }

    pub fn is_context_valid(&self) -> bool {
        self.tag == CONTEXT_TAG_VALID
    }

    /// Mark the context torn down; later Prepare commands are refused.
    pub fn invalidate(&mut self) {
        self.tag = 0;
    }

    fn set_state(&mut self, to: ControlState, sink: &mut impl EventSink) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        info!("OTA: {:?} -> {:?}", from, to);
        sink.emit(&AppEvent::StateChanged { from, to });
    }

    // ── Control-point writes ──────────────────────────────────

    /// Handle a write to the control-point characteristic.
    pub fn on_command(
        &mut self,
        conn_id: u16,
        payload: &[u8],
        io: &mut Ports<'_, impl UpdateEngine, impl LinkPort, impl ResetPort, impl EventSink>,
    ) -> Result<()> {
        let command = ControlCommand::decode(payload).inspect_err(|e| {
            warn!("OTA: rejected control write: {}", e);
        })?;

        match command {
            ControlCommand::Prepare => self.prepare(conn_id, io),
            ControlCommand::Download { total_size } => self.download(conn_id, total_size, io),
            ControlCommand::Verify { crc32 } => self.verify(conn_id, crc32, io),
            ControlCommand::Abort => {
                self.abort(io);
                Ok(())
            }
        }
    }

    fn unexpected(&self, command: ControlCommand) -> Error {
        warn!(
            "OTA: {:?} not valid in state {:?}",
            command, self.state
        );
        ProtocolViolation::UnexpectedCommand {
            opcode: command.opcode(),
        }
        .into()
    }

    fn prepare(
        &mut self,
        conn_id: u16,
        io: &mut Ports<'_, impl UpdateEngine, impl LinkPort, impl ResetPort, impl EventSink>,
    ) -> Result<()> {
        if !self.state.accepts_prepare() {
            return Err(self.unexpected(ControlCommand::Prepare));
        }

        self.connection = ConnectionType::Ble;
        if !self.is_context_valid() {
            warn!("OTA: application context invalid, not starting agent");
            return Err(EngineError::StartFailed.into());
        }

        io.engine.start(self.connection).inspect_err(|e| {
            warn!("OTA: agent start failed: {}", e);
        })?;
        io.engine.prepare().inspect_err(|e| {
            warn!("OTA: prepare failed: {}", e);
        })?;

        self.set_state(ControlState::Preparing, io.sink);
        self.emitter.notify(io.link, conn_id, UpgradeStatus::Ok)?;
        Ok(())
    }

    fn download(
        &mut self,
        conn_id: u16,
        total_size: u32,
        io: &mut Ports<'_, impl UpdateEngine, impl LinkPort, impl ResetPort, impl EventSink>,
    ) -> Result<()> {
        if self.state != ControlState::Preparing {
            return Err(self.unexpected(ControlCommand::Download { total_size }));
        }

        io.engine.begin_download(total_size).inspect_err(|e| {
            warn!("OTA: download of {} bytes refused: {}", total_size, e);
        })?;

        info!("OTA: downloading {} bytes", total_size);
        self.set_state(ControlState::Downloading, io.sink);
        self.emitter.notify(io.link, conn_id, UpgradeStatus::Ok)?;
        Ok(())
    }

    fn verify(
        &mut self,
        conn_id: u16,
        crc32: u32,
        io: &mut Ports<'_, impl UpdateEngine, impl LinkPort, impl ResetPort, impl EventSink>,
    ) -> Result<()> {
        if !matches!(self.state, ControlState::Downloading | ControlState::Failed) {
            return Err(self.unexpected(ControlCommand::Verify { crc32 }));
        }

        info!("OTA: verify against host CRC 0x{:08x}", crc32);
        self.set_state(ControlState::Verifying, io.sink);

        match io.engine.verify(crc32, true) {
            Ok(()) => {
                self.set_state(ControlState::Complete, io.sink);
                io.sink.emit(&AppEvent::VerifyFinished { ok: true });
                self.emitter.indicate(io.link, conn_id, UpgradeStatus::Ok)?;
                Ok(())
            }
            Err(e) => {
                warn!("OTA: verify failed: {}", e);
                self.set_state(ControlState::Failed, io.sink);
                io.sink.emit(&AppEvent::VerifyFinished { ok: false });
                // The engine failure is what the peer sees; a lost BAD
                // indication is only logged.
                let _ = self.emitter.indicate(io.link, conn_id, UpgradeStatus::Bad);
                Err(e.into())
            }
        }
    }

    fn abort(
        &mut self,
        io: &mut Ports<'_, impl UpdateEngine, impl LinkPort, impl ResetPort, impl EventSink>,
    ) {
        if let Err(e) = io.engine.abort() {
            warn!("OTA: engine abort reported {}", e);
        }
        let next = if self.state.in_session() {
            ControlState::Aborted
        } else {
            ControlState::Idle
        };
        info!("OTA: aborted");
        self.set_state(next, io.sink);
    }

    // ── Data writes ───────────────────────────────────────────

    /// Forward a data-characteristic write to the engine.
    pub fn on_data(
        &mut self,
        value: &[u8],
        offset: u16,
        io: &mut Ports<'_, impl UpdateEngine, impl LinkPort, impl ResetPort, impl EventSink>,
    ) -> Result<()> {
        io.engine.write_chunk(value, offset).inspect_err(|e| {
            warn!(
                "OTA: chunk of {} bytes at offset {} rejected: {}",
                value.len(),
                offset,
                e
            );
        })?;

        let progress = io.engine.progress();
        let percent = progress.percent();
        info!(
            "OTA: downloaded {} of {} ({}%)",
            progress.written, progress.total, percent
        );
        io.sink.emit(&AppEvent::DownloadProgress {
            written: progress.written,
            total: progress.total,
            percent,
        });
        Ok(())
    }

    // ── Indication confirmation ───────────────────────────────

    /// The peer acknowledged our indication.
    ///
    /// A completed image with reboot enabled schedules the reset. A failed
    /// verify keeps the session for a retry. Anything else stops the agent.
    pub fn on_value_confirmation(
        &mut self,
        io: &mut Ports<'_, impl UpdateEngine, impl LinkPort, impl ResetPort, impl EventSink>,
    ) {
        let engine_state = io.engine.state();
        info!("OTA: value confirmation, engine state {:?}", engine_state);

        if engine_state == SessionState::Complete && self.reboot_at_end {
            warn!("OTA: image complete, resetting in {} ms", self.settle_ms);
            io.reset.reset_after(self.settle_ms);
            io.sink.emit(&AppEvent::ResetScheduled {
                settle_ms: self.settle_ms,
            });
        } else if self.state == ControlState::Failed && engine_state == SessionState::Failed {
            info!("OTA: verify failure acknowledged, awaiting retry");
        } else {
            io.engine.stop();
            if matches!(self.state, ControlState::Complete | ControlState::Failed) {
                self.set_state(ControlState::Idle, io.sink);
            }
        }
    }

    // ── Teardown ──────────────────────────────────────────────

    /// Release the engine and invalidate the context. Used when the
    /// service is shutting down; no later Prepare is accepted.
    pub fn teardown(
        &mut self,
        io: &mut Ports<'_, impl UpdateEngine, impl LinkPort, impl ResetPort, impl EventSink>,
    ) {
        if self.state.in_session() || self.state == ControlState::Failed {
            if let Err(e) = io.engine.abort() {
                warn!("OTA: engine abort reported {}", e);
            }
        }
        io.engine.stop();
        self.invalidate();
        self.connection = ConnectionType::None;
        self.set_state(ControlState::Idle, io.sink);
        info!("OTA: control point torn down");
    }
}
