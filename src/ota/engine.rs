//! Flash-backed update engine over the `esp-ota` crate.
//!
//! Flow: start → prepare → begin_download(size) → N × write_chunk → verify
//!
//! A running CRC-32 (ISO-HDLC, the zlib polynomial) is kept over every
//! accepted byte so verify never has to read the partition back.
//!
//! On ESP-IDF targets the image is written through `esp_ota::OtaUpdate`.
//! On simulation targets only the counters and CRC are tracked.

use crc::{CRC_32_ISO_HDLC, Crc, Digest};
use log::{info, warn};

use crate::app::ports::{ConnectionType, Progress, SessionState, UpdateEngine};
use crate::error::EngineError;

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 of a whole image, as the host computes it.
pub fn image_crc32(image: &[u8]) -> u32 {
    CRC32.checksum(image)
}

pub struct FlashUpdateEngine {
    state: SessionState,
    agent_running: bool,
    connection: ConnectionType,
    max_image_size: u32,
    total: u32,
    written: u32,
    digest: Option<Digest<'static, u32>>,
    /// Finalized CRC, kept so a failed verify can be re-driven.
    image_crc: Option<u32>,
    #[cfg(target_os = "espidf")]
    ota_update: Option<esp_ota::OtaUpdate>,
}

impl FlashUpdateEngine {
    pub fn new(max_image_size: u32) -> Self {
        Self {
            state: SessionState::Idle,
            agent_running: false,
            connection: ConnectionType::None,
            max_image_size,
            total: 0,
            written: 0,
            digest: None,
            image_crc: None,
            #[cfg(target_os = "espidf")]
            ota_update: None,
        }
    }

    pub fn connection(&self) -> ConnectionType {
        self.connection
    }

    pub fn is_running(&self) -> bool {
        self.agent_running
    }

    fn reset_session(&mut self) {
        #[cfg(target_os = "espidf")]
        {
            // esp-ota aborts automatically when OtaUpdate is dropped
            self.ota_update.take();
        }
        self.state = SessionState::Idle;
        self.total = 0;
        self.written = 0;
        self.digest = None;
        self.image_crc = None;
    }

    fn fail(&mut self, err: EngineError) -> EngineError {
        self.state = SessionState::Failed;
        err
    }
}

impl UpdateEngine for FlashUpdateEngine {
    fn start(&mut self, connection: ConnectionType) -> Result<(), EngineError> {
        if connection == ConnectionType::None {
            return Err(EngineError::StartFailed);
        }
        if matches!(
            self.state,
            SessionState::Downloading | SessionState::Verifying
        ) {
            warn!("OTA: start refused, session in progress");
            return Err(EngineError::StartFailed);
        }
        self.reset_session();
        self.connection = connection;
        self.agent_running = true;
        info!("OTA: agent started ({:?})", connection);
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), EngineError> {
        if !self.agent_running || self.state != SessionState::Idle {
            return Err(EngineError::InvalidState);
        }

        #[cfg(target_os = "espidf")]
        {
            let update = esp_ota::OtaUpdate::begin().map_err(|e| {
                warn!("esp-ota begin failed: {:?}", e);
                EngineError::NoPartition
            })?;
            self.ota_update = Some(update);
        }

        self.state = SessionState::Prepared;
        info!("OTA: storage prepared");
        Ok(())
    }

    fn begin_download(&mut self, total_size: u32) -> Result<(), EngineError> {
        if self.state != SessionState::Prepared {
            return Err(EngineError::InvalidState);
        }
        if total_size == 0 || total_size > self.max_image_size {
            return Err(EngineError::InvalidSize);
        }
        self.total = total_size;
        self.written = 0;
        self.digest = Some(CRC32.digest());
        self.image_crc = None;
        self.state = SessionState::Downloading;
        info!("OTA: begin ({} bytes)", total_size);
        Ok(())
    }

    /// An offset of zero appends (single write requests carry none);
    /// any other offset must equal the bytes already written.
    fn write_chunk(&mut self, data: &[u8], offset: u16) -> Result<(), EngineError> {
        if self.state != SessionState::Downloading {
            return Err(EngineError::InvalidState);
        }
        if offset != 0 && u32::from(offset) != self.written {
            return Err(EngineError::NonSequential);
        }
        let Some(new_written) = self
            .written
            .checked_add(data.len() as u32)
            .filter(|&n| n <= self.total)
        else {
            return Err(EngineError::Overflow);
        };

        #[cfg(target_os = "espidf")]
        {
            if let Some(ref mut update) = self.ota_update {
                if let Err(e) = update.write(data) {
                    warn!("esp-ota write failed: {:?}", e);
                    return Err(self.fail(EngineError::WriteFailed));
                }
            } else {
                return Err(EngineError::InvalidState);
            }
        }

        if let Some(digest) = self.digest.as_mut() {
            digest.update(data);
        }
        self.written = new_written;
        Ok(())
    }

    fn verify(&mut self, crc32: u32, use_crc: bool) -> Result<(), EngineError> {
        if !matches!(
            self.state,
            SessionState::Downloading | SessionState::Failed
        ) {
            return Err(EngineError::InvalidState);
        }
        if self.total == 0 || self.written != self.total {
            return Err(self.fail(EngineError::IncompleteTransfer));
        }

        self.state = SessionState::Verifying;

        if use_crc {
            let computed = match self.image_crc {
                Some(crc) => crc,
                None => {
                    let crc = self
                        .digest
                        .take()
                        .map_or_else(|| CRC32.digest().finalize(), |d| d.finalize());
                    self.image_crc = Some(crc);
                    crc
                }
            };
            if computed != crc32 {
                warn!(
                    "OTA: CRC mismatch (host 0x{:08x}, image 0x{:08x})",
                    crc32, computed
                );
                return Err(self.fail(EngineError::CrcMismatch));
            }
        }

        #[cfg(target_os = "espidf")]
        {
            let Some(update) = self.ota_update.take() else {
                return Err(self.fail(EngineError::InvalidState));
            };
            let mut completed = match update.finalize() {
                Ok(c) => c,
                Err(e) => {
                    warn!("esp-ota finalize failed: {:?}", e);
                    return Err(self.fail(EngineError::WriteFailed));
                }
            };
            if let Err(e) = completed.set_as_boot_partition() {
                warn!("esp-ota set_as_boot_partition failed: {:?}", e);
                return Err(self.fail(EngineError::BootSetFailed));
            }
        }

        self.state = SessionState::Complete;
        info!("OTA: image verified, ready to reboot");
        Ok(())
    }

    fn abort(&mut self) -> Result<(), EngineError> {
        self.reset_session();
        warn!("OTA: session aborted");
        Ok(())
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn progress(&self) -> Progress {
        Progress {
            written: self.written,
            total: self.total,
        }
    }

    fn stop(&mut self) {
        if self.state == SessionState::Complete {
            // Boot partition already switched; only forget the session.
            self.state = SessionState::Idle;
        } else {
            self.reset_session();
        }
        self.agent_running = false;
        self.connection = ConnectionType::None;
        info!("OTA: agent stopped");
    }
}

// ── Boot validation ───────────────────────────────────────────

/// Check OTA image state on startup and mark this firmware as valid.
///
/// Without this, the rollback watchdog reverts to the previous firmware
/// after a failed boot.
#[cfg(target_os = "espidf")]
pub fn check_rollback() {
    match esp_ota::mark_app_valid() {
        Ok(()) => info!("OTA: firmware marked valid (rollback cancelled)"),
        Err(e) => warn!("OTA: mark_app_valid failed: {:?}", e),
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn check_rollback() {
    log::info!("OTA rollback check (simulation): skipped");
}

// ── Tests ─────────────────────────────────────────────────────
