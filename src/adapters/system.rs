//! Deferred device reset.
//!
//! The reset request arrives inside a Bluetooth callback, which must not
//! block for the settle delay. [`DeferredReset`] only raises a signal; the
//! main task waits on it, sleeps the settle time and restarts.
//!
//! ```text
//!  BT task ── reset_after(ms) ──▶ RESET_SIGNAL ──▶ main task: delay(ms), restart
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embedded_hal::delay::DelayNs;
use log::{info, warn};

use crate::app::ports::ResetPort;

/// Carries the requested settle delay in milliseconds.
pub type ResetSignal = Signal<CriticalSectionRawMutex, u32>;

/// Shared between the BT callback context and the main task.
pub static RESET_SIGNAL: ResetSignal = Signal::new();

/// [`ResetPort`] that hands the request to whoever waits on the signal.
pub struct DeferredReset {
    signal: &'static ResetSignal,
}

impl DeferredReset {
    pub const fn new(signal: &'static ResetSignal) -> Self {
        Self { signal }
    }
}

impl Default for DeferredReset {
    fn default() -> Self {
        Self::new(&RESET_SIGNAL)
    }
}

impl ResetPort for DeferredReset {
    fn reset_after(&mut self, settle_ms: u32) {
        if self.signal.signaled() {
            warn!("SYS: reset already pending, settle now {} ms", settle_ms);
        }
        self.signal.signal(settle_ms);
    }
}

/// Block until a reset is requested, then wait out the settle delay.
/// Returns the delay that was honoured; the caller restarts.
pub fn wait_for_reset(signal: &ResetSignal, delay: &mut impl DelayNs) -> u32 {
    let settle_ms = futures_lite::future::block_on(signal.wait());
    info!("SYS: reset requested, settling {} ms", settle_ms);
    delay.delay_ms(settle_ms);
    settle_ms
}

/// Restart into whatever partition is marked bootable.
#[cfg(target_os = "espidf")]
pub fn restart() -> ! {
    info!("SYS: restarting into new firmware");
    esp_ota::restart();
}
