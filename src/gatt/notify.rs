//! Status replies on the control point.
//!
//! Prepare and Download successes go out as notifications. Verify
//! outcomes go out as indications so the peer's confirmation can gate
//! the reset.

use log::{debug, warn};

use crate::app::ports::LinkPort;
use crate::error::TransportError;
use crate::gatt::db::CONTROL_POINT_HANDLE;
use crate::ota::command::UpgradeStatus;

/// Sends one-byte [`UpgradeStatus`] values on a fixed handle.
#[derive(Debug, Clone, Copy)]
pub struct StatusEmitter {
    handle: u16,
}

impl StatusEmitter {
    pub const fn new(handle: u16) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn notify(
        &self,
        link: &mut impl LinkPort,
        conn_id: u16,
        status: UpgradeStatus,
    ) -> Result<(), TransportError> {
        let value = [status.as_byte()];
        link.send_notification(conn_id, self.handle, &value)
            .inspect(|_| debug!("GATT: notified {:?} on 0x{:04x}", status, self.handle))
            .inspect_err(|e| warn!("GATT: notification failed: {}", e))
    }

    pub fn indicate(
        &self,
        link: &mut impl LinkPort,
        conn_id: u16,
        status: UpgradeStatus,
    ) -> Result<(), TransportError> {
        let value = [status.as_byte()];
        link.send_indication(conn_id, self.handle, &value)
            .inspect(|_| debug!("GATT: indicated {:?} on 0x{:04x}", status, self.handle))
            .inspect_err(|e| warn!("GATT: indication failed: {}", e))
    }
}

impl Default for StatusEmitter {
    fn default() -> Self {
        Self::new(CONTROL_POINT_HANDLE)
    }
}
