//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Bluetooth stack ──▶ OtaService (domain) ──▶ Port traits ──▶ Adapters
//! ```
//!
//! Driven adapters (update engine, radio link, reset, storage, event sinks)
//! implement these traits. The [`OtaService`](super::service::OtaService)
//! consumes them via generics, so the domain core never touches the radio
//! or flash directly.
//!
//! Bond records pass through [`StoragePort`] as opaque postcard blobs;
//! a backend that can encrypt its partition should.

use crate::config::OtaConfig;
use crate::error::{EngineError, TransportError};

// ───────────────────────────────────────────────────────────────
// Update engine port (driven adapter: domain → flash)
// ───────────────────────────────────────────────────────────────

/// Transport an update session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionType {
    #[default]
    None,
    Ble,
}

/// Lifecycle of the engine's own session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    /// Agent started and storage opened, waiting for the image size.
    Prepared,
    Downloading,
    Verifying,
    Complete,
    Failed,
}

/// Byte counters surfaced for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub written: u32,
    pub total: u32,
}

impl Progress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((u64::from(self.written) * 100) / u64::from(self.total)).min(100) as u8
    }
}

/// The component that owns the update session and writes the image.
///
/// The control point only drives it through these calls; the engine is
/// the single source of truth for session state and must guard against
/// calls that arrive in the wrong state.
pub trait UpdateEngine {
    /// Start the update agent for a session over `connection`.
    fn start(&mut self, connection: ConnectionType) -> Result<(), EngineError>;

    /// Open storage for a new image.
    fn prepare(&mut self) -> Result<(), EngineError>;

    /// Declare the image size and begin accepting chunks.
    fn begin_download(&mut self, total_size: u32) -> Result<(), EngineError>;

    /// Store one chunk. `offset` is the ATT offset the chunk arrived with.
    fn write_chunk(&mut self, data: &[u8], offset: u16) -> Result<(), EngineError>;

    /// Check the received image and, on success, mark it bootable.
    fn verify(&mut self, crc32: u32, use_crc: bool) -> Result<(), EngineError>;

    /// Best-effort cancel of the current session.
    fn abort(&mut self) -> Result<(), EngineError>;

    fn state(&self) -> SessionState;

    fn progress(&self) -> Progress;

    /// Stop the agent without touching a completed image.
    fn stop(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Link port (driven adapter: domain → radio)
// ───────────────────────────────────────────────────────────────

/// Server-initiated sends on the GATT link.
pub trait LinkPort {
    fn send_notification(
        &mut self,
        conn_id: u16,
        handle: u16,
        value: &[u8],
    ) -> Result<(), TransportError>;

    /// Sends an indication; the peer's confirmation arrives later as a
    /// separate request.
    fn send_indication(
        &mut self,
        conn_id: u16,
        handle: u16,
        value: &[u8],
    ) -> Result<(), TransportError>;
}

// ───────────────────────────────────────────────────────────────
// Reset port (driven adapter: domain → system)
// ───────────────────────────────────────────────────────────────

/// Device reset into the freshly written image.
///
/// Implementations must not block the caller for the settle time; the
/// request is honoured from another task.
pub trait ResetPort {
    fn reset_after(&mut self, settle_ms: u32);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → log)
// ───────────────────────────────────────────────────────────────

/// Receives every [`AppEvent`](super::events::AppEvent) the service raises.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Port bundle
// ───────────────────────────────────────────────────────────────

/// The driven ports a single GATT request may touch, borrowed for the
/// duration of that request.
pub struct Ports<'a, E, L, R, S> {
    pub engine: &'a mut E,
    pub link: &'a mut L,
    pub reset: &'a mut R,
    pub sink: &'a mut S,
}

impl<'a, E, L, R, S> Ports<'a, E, L, R, S>
where
    E: UpdateEngine,
    L: LinkPort,
    R: ResetPort,
    S: EventSink,
{
    pub fn new(engine: &'a mut E, link: &'a mut L, reset: &'a mut R, sink: &'a mut S) -> Self {
        Self {
            engine,
            link,
            reset,
            sink,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Config port (driven adapter: boot ↔ NVS)
// ───────────────────────────────────────────────────────────────

/// Where the [`OtaConfig`] read at boot comes from.
///
/// A value outside its range is refused with
/// [`ConfigError::ValidationFailed`] rather than clamped.
pub trait ConfigPort {
    /// The stored config, or [`OtaConfig::default()`] on first boot.
    fn load(&self) -> Result<OtaConfig, ConfigError>;

    fn save(&self, config: &OtaConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: bond table ↔ NVS)
// ───────────────────────────────────────────────────────────────

/// Namespaced blob store holding the bond slots and the identity record.
///
/// A write either lands whole or not at all; NVS gives that per key.
pub trait StoragePort {
    /// Copy a blob into `buf`, returning its length (truncated to `buf`).
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Missing keys are not an error.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Why a config could not be loaded or saved.
#[derive(Debug)]
pub enum ConfigError {
    NotFound,
    /// The stored blob is not a valid postcard `OtaConfig`.
    Corrupted,
    /// Names the offending field.
    ValidationFailed(&'static str),
    StorageFull,
    IoError,
}

/// Why a blob could not be read or written.
#[derive(Debug)]
pub enum StorageError {
    NotFound,
    /// No free NVS pages.
    Full,
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "no stored OTA config"),
            Self::Corrupted => write!(f, "stored OTA config undecodable"),
            Self::ValidationFailed(field) => write!(f, "OTA config field out of range: {}", field),
            Self::StorageFull => write!(f, "NVS full"),
            Self::IoError => write!(f, "NVS access failed"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "no such key"),
            Self::Full => write!(f, "NVS full"),
            Self::IoError => write!(f, "NVS access failed"),
        }
    }
}
