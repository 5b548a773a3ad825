//! BLE OTA firmware: main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Adapters (outer ring)                    │
//! │                                                              │
//! │  BleAdapter / BleLink   NvsAdapter     DeferredReset         │
//! │  (Bluedroid, LinkPort)  (Config+NVS)   (ResetPort)           │
//! │  LogEventSink           FlashUpdateEngine                    │
//! │  (EventSink)            (UpdateEngine, esp-ota)              │
//! │                                                              │
//! │  ──────────────── Port Trait Boundary ───────────────────    │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │              OtaService (pure logic)                   │  │
//! │  │  GattDispatcher · ControlPoint · BondStore             │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All GATT work happens in the Bluedroid task. The main task only waits
//! for a reset request and performs it.
#![deny(unused_must_use)]

use anyhow::{Result, anyhow};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{info, warn};

use bleota::adapters::ble::{BleAdapter, BtContext};
use bleota::adapters::log_sink::LogEventSink;
use bleota::adapters::nvs::NvsAdapter;
use bleota::adapters::system::{RESET_SIGNAL, restart, wait_for_reset};
use bleota::app::ports::ConfigPort;
use bleota::app::service::OtaService;
use bleota::config::OtaConfig;
use bleota::ota::engine::{FlashUpdateEngine, check_rollback};

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  BLE OTA v{}                         ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 1b. OTA rollback check ────────────────────────────────
    check_rollback();

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let partition = EspDefaultNvsPartition::take()?;
    let nvs = NvsAdapter::new(partition);
    let config = match nvs.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            OtaConfig::default()
        }
    };

    // ── 3. Construct the service ──────────────────────────────
    let mut sink = LogEventSink::new();
    let mut service =
        OtaService::new(config.clone()).map_err(|e| anyhow!("attribute table: {}", e))?;
    service.start(&nvs, &mut sink);

    let engine = FlashUpdateEngine::new(config.max_image_size);

    // ── 4. Hand everything to the BT task ─────────────────────
    let mut ble = BleAdapter::new(&config);
    ble.start(BtContext::new(service, engine, nvs))
        .map_err(|e| anyhow!("{}", e))?;

    info!("System ready. Waiting for an update.");

    // ── 5. Deferred reset ─────────────────────────────────────
    let mut delay = FreeRtos;
    wait_for_reset(&RESET_SIGNAL, &mut delay);
    restart()
}
