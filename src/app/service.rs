//! OTA service: the hexagonal core.
//!
//! [`OtaService`] is the one session object. It owns the GATT dispatcher
//! (attribute table, long-write buffer, control point), the bond table
//! and the configuration. All I/O flows through port traits injected at
//! call sites, so the whole service runs against mocks on the host.
//!
//! ```text
//!  GattEvent ───────▶ ┌────────────────────────┐ ──▶ UpdateEngine / LinkPort
//!                     │       OtaService        │ ──▶ ResetPort
//!  ManagementEvent ──▶│ Dispatcher · BondStore  │ ──▶ StoragePort
//!                     └────────────────────────┘ ──▶ EventSink
//! ```

use log::{debug, info, warn};

use crate::bonding::BondStore;
use crate::config::OtaConfig;
use crate::error::{BondError, Error};
use crate::gatt::att::{AttResponse, GattEvent, GattStatus};
use crate::gatt::connection::BdAddr;
use crate::gatt::db::AttributeTable;
use crate::gatt::dispatcher::GattDispatcher;
use crate::ota::control_point::ControlState;

use super::commands::{IoCapabilities, ManagementEvent, ManagementReply};
use super::events::AppEvent;
use super::ports::{EventSink, LinkPort, Ports, ResetPort, StoragePort, UpdateEngine};

// ───────────────────────────────────────────────────────────────
// OtaService
// ───────────────────────────────────────────────────────────────

pub struct OtaService {
    dispatcher: GattDispatcher,
    bonds: BondStore,
    config: OtaConfig,
    /// Peer of the most recent connection-parameter update.
    last_param_peer: Option<BdAddr>,
}

impl OtaService {
    /// Build the attribute table for `config`. Bonds are loaded by
    /// [`start`](Self::start).
    pub fn new(config: OtaConfig) -> Result<Self, Error> {
        let table = AttributeTable::ota_service(&config)?;
        let dispatcher = GattDispatcher::new(table, &config);
        Ok(Self {
            dispatcher,
            bonds: BondStore::new(),
            config,
            last_param_peer: None,
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Restore bonds from storage.
    pub fn start(&mut self, storage: &dyn StoragePort, sink: &mut impl EventSink) {
        self.bonds = BondStore::load(storage);
        info!(
            "OtaService started as '{}' ({} bond(s))",
            self.config.device_name,
            self.bonds.len()
        );
        sink.emit(&AppEvent::Started {
            bonds: self.bonds.len() as u8,
        });
    }

    /// Tear down the update session before the stack goes away.
    pub fn shutdown(
        &mut self,
        io: &mut Ports<'_, impl UpdateEngine, impl LinkPort, impl ResetPort, impl EventSink>,
    ) {
        self.dispatcher.control_mut().teardown(io);
        info!("OtaService stopped");
    }

    // ── GATT events ───────────────────────────────────────────

    /// Route one transport event. Link events always succeed.
    pub fn handle_gatt_event(
        &mut self,
        event: &GattEvent<'_>,
        io: &mut Ports<'_, impl UpdateEngine, impl LinkPort, impl ResetPort, impl EventSink>,
    ) -> Result<AttResponse, GattStatus> {
        match *event {
            GattEvent::Connected { conn_id, peer } => {
                self.dispatcher.on_connected(conn_id, peer);
                io.sink.emit(&AppEvent::Connected { conn_id, peer });
                Ok(AttResponse::None)
            }
            GattEvent::Disconnected { conn_id, reason } => {
                self.dispatcher.on_disconnected(conn_id, reason);
                io.sink.emit(&AppEvent::Disconnected { conn_id, reason });
                Ok(AttResponse::None)
            }
            GattEvent::Request {
                conn_id,
                ref request,
            } => self.dispatcher.handle(conn_id, request, io),
        }
    }

    // ── Management events ─────────────────────────────────────

    /// Answer one security / advertising event from the stack.
    pub fn handle_management_event(
        &mut self,
        event: &ManagementEvent,
        storage: &mut dyn StoragePort,
        sink: &mut impl EventSink,
    ) -> ManagementReply {
        match *event {
            ManagementEvent::PairingIoCapsRequest { peer } => {
                info!("BOND: pairing request from {}", peer);
                ManagementReply::IoCaps(IoCapabilities::default())
            }
            ManagementEvent::SecurityRequest { peer } => {
                info!("BOND: security request from {}, granted", peer);
                ManagementReply::SecurityGranted
            }
            ManagementEvent::PairingComplete { peer, success } => {
                if success {
                    info!("BOND: pairing with {} complete", peer);
                } else {
                    warn!("BOND: pairing with {} failed", peer);
                }
                ManagementReply::Ack
            }
            ManagementEvent::EncryptionStatus { peer, encrypted } => {
                info!(
                    "BOND: link to {} {}",
                    peer,
                    if encrypted { "encrypted" } else { "not encrypted" }
                );
                ManagementReply::Ack
            }
            ManagementEvent::LinkKeysUpdated(ref keys) => {
                match self.bonds.store_link_keys(storage, keys) {
                    Ok(_) => {
                        sink.emit(&AppEvent::BondStored(keys.addr));
                        ManagementReply::Ack
                    }
                    Err(BondError::TableFull) => {
                        sink.emit(&AppEvent::BondTableFull(keys.addr));
                        ManagementReply::Failed(BondError::TableFull)
                    }
                    Err(e) => ManagementReply::Failed(e),
                }
            }
            ManagementEvent::LinkKeysRequested(addr) => match self.bonds.link_keys(&addr) {
                Ok(keys) => {
                    info!("BOND: keys found for {}", addr);
                    ManagementReply::LinkKeys(keys)
                }
                Err(e) => {
                    info!("BOND: no keys for {}, stack will pair afresh", addr);
                    ManagementReply::Failed(e)
                }
            },
            ManagementEvent::LocalIdentityKeysUpdated(ref keys) => {
                match self.bonds.store_identity(storage, keys) {
                    Ok(()) => ManagementReply::Ack,
                    Err(e) => ManagementReply::Failed(e),
                }
            }
            ManagementEvent::LocalIdentityKeysRequested => match self.bonds.identity() {
                Ok(keys) => ManagementReply::IdentityKeys(*keys),
                Err(e) => {
                    debug!("BOND: identity keys requested, none stored");
                    ManagementReply::Failed(e)
                }
            },
            ManagementEvent::AdvertisingStateChanged { on } => {
                info!("BLE: advertising {}", if on { "started" } else { "stopped" });
                ManagementReply::Ack
            }
            ManagementEvent::ConnectionParamsUpdated {
                peer,
                interval,
                latency,
                timeout,
            } => {
                info!(
                    "BLE: conn params for {}: interval {} latency {} timeout {}",
                    peer, interval, latency, timeout
                );
                self.last_param_peer = Some(peer);
                ManagementReply::Ack
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn control_state(&self) -> ControlState {
        self.dispatcher.control().state()
    }

    pub fn dispatcher(&self) -> &GattDispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut GattDispatcher {
        &mut self.dispatcher
    }

    pub fn bonds(&self) -> &BondStore {
        &self.bonds
    }

    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    pub fn last_param_peer(&self) -> Option<BdAddr> {
        self.last_param_peer
    }
}
