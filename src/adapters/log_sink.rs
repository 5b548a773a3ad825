//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the ESP-IDF logger (which goes to UART / USB-CDC in production).

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started { bonds } => {
                info!("START | bonds={}", bonds);
            }
            AppEvent::Connected { conn_id, peer } => {
                info!("LINK  | connected conn_id={} peer={}", conn_id, peer);
            }
            AppEvent::Disconnected { conn_id, reason } => {
                info!(
                    "LINK  | disconnected conn_id={} reason=0x{:02x}",
                    conn_id, reason
                );
            }
            AppEvent::StateChanged { from, to } => {
                info!("STATE | {:?} -> {:?}", from, to);
            }
            AppEvent::DownloadProgress {
                written,
                total,
                percent,
            } => {
                info!("OTA   | {}/{} bytes ({}%)", written, total, percent);
            }
            AppEvent::VerifyFinished { ok } => {
                if *ok {
                    info!("OTA   | image verified");
                } else {
                    warn!("OTA   | image verification failed");
                }
            }
            AppEvent::ResetScheduled { settle_ms } => {
                info!("OTA   | reset in {} ms", settle_ms);
            }
            AppEvent::BondStored(addr) => {
                info!("BOND  | stored {}", addr);
            }
            AppEvent::BondTableFull(addr) => {
                warn!("BOND  | table full, {} not bonded", addr);
            }
        }
    }
}
