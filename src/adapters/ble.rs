//! BLE GATT server adapter.
//!
//! Bridges the Bluedroid stack to [`OtaService`]: stack callbacks are
//! translated into [`GattEvent`]s and [`ManagementEvent`]s, the service's
//! answers go back as GATT responses, and [`BleLink`] implements
//! [`LinkPort`] for the control point's notifications and indications.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GATT server via `esp_idf_svc::sys`.
//! - **all other targets**: simulation, events are injected by the caller.
//!
//! ## GATT Service Layout
//!
//! | Attribute            | UUID                                    | Perms              |
//! |----------------------|-----------------------------------------|--------------------|
//! | Control point        | `c7261110-…-9d7246768bd8`               | Read+Write+Ind+Ntf |
//! | Control point CCCD   | `0x2902`                                | Read+Write         |
//! | Data                 | `7c4a3a93-…-3c8a07f26f4a`               | Write+WriteNR      |
//!
//! Bluedroid assigns its own handles; [`HandleMap`] translates them to the
//! fixed handles of the local attribute table.

use core::fmt;
use log::{info, warn};

use crate::adapters::log_sink::LogEventSink;
use crate::adapters::nvs::NvsAdapter;
use crate::adapters::system::DeferredReset;
use crate::app::commands::{ManagementEvent, ManagementReply};
use crate::app::ports::{LinkPort, Ports};
use crate::app::service::OtaService;
use crate::bonding::LinkKeys;
use crate::config::OtaConfig;
use crate::error::TransportError;
use crate::gatt::att::{AttResponse, GattEvent, GattRequest, GattStatus};
use crate::gatt::connection::BdAddr;
use crate::gatt::db::{CONTROL_POINT_CCCD_HANDLE, CONTROL_POINT_HANDLE, DATA_HANDLE};
use crate::ota::engine::FlashUpdateEngine;

#[cfg(target_os = "espidf")]
use crate::gatt::att::WriteKind;
#[cfg(target_os = "espidf")]
use crate::gatt::db::{CHAR_CONTROL_POINT_UUID, CHAR_DATA_UUID, OTA_SERVICE_UUID};

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

/// Legacy advertising payload limit.
const ADV_DATA_MAX: usize = 31;

const AD_TYPE_FLAGS: u8 = 0x01;
const AD_TYPE_SHORT_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_NAME: u8 = 0x09;
/// LE General Discoverable, BR/EDR not supported.
const AD_FLAGS_LE_ONLY: u8 = 0x06;

/// Key-mask bits recorded in [`LinkKeys::key_mask`].
pub const KEY_MASK_ENC: u8 = 0x01;
pub const KEY_MASK_ID: u8 = 0x02;
pub const KEY_MASK_SIGN: u8 = 0x04;

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleError {
    /// A Bluedroid bring-up call returned this `esp_err_t`.
    StackInitFailed(i32),
    AlreadyStarted,
}

impl fmt::Display for BleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackInitFailed(code) => write!(f, "BLE stack initialisation failed ({})", code),
            Self::AlreadyStarted => write!(f, "BLE adapter already started"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// BLE state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleState {
    Idle,
    Advertising,
    Connected,
    Failed,
}

// ───────────────────────────────────────────────────────────────
// Handle translation
// ───────────────────────────────────────────────────────────────

/// Stack-assigned handles of the three OTA attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandleMap {
    pub control: u16,
    pub cccd: u16,
    pub data: u16,
}

impl HandleMap {
    pub fn is_complete(&self) -> bool {
        self.control != 0 && self.cccd != 0 && self.data != 0
    }

    /// Local table handle for a stack handle.
    pub fn to_local(&self, stack: u16) -> Option<u16> {
        match stack {
            0 => None,
            h if h == self.control => Some(CONTROL_POINT_HANDLE),
            h if h == self.cccd => Some(CONTROL_POINT_CCCD_HANDLE),
            h if h == self.data => Some(DATA_HANDLE),
            _ => None,
        }
    }

    /// Stack handle for a local table handle.
    pub fn to_stack(&self, local: u16) -> Option<u16> {
        let h = match local {
            CONTROL_POINT_HANDLE => self.control,
            CONTROL_POINT_CCCD_HANDLE => self.cccd,
            DATA_HANDLE => self.data,
            _ => 0,
        };
        (h != 0).then_some(h)
    }
}

// ───────────────────────────────────────────────────────────────
// Key assembly
// ───────────────────────────────────────────────────────────────

/// Bluedroid hands over a peer's keys one at a time during pairing; they
/// are collected here and persisted as one record when pairing completes.
#[derive(Debug, Default)]
pub struct PendingKeys {
    keys: Option<LinkKeys>,
}

impl PendingKeys {
    fn entry(&mut self, addr: BdAddr) -> &mut LinkKeys {
        if self.keys.is_some_and(|k| k.addr != addr) {
            warn!("BLE: dropping partial keys, pairing moved to {}", addr);
            self.keys = None;
        }
        self.keys.get_or_insert_with(|| LinkKeys::new(addr))
    }

    pub fn add_encryption(
        &mut self,
        addr: BdAddr,
        ltk: [u8; 16],
        ediv: u16,
        rand: [u8; 8],
        key_size: u8,
    ) {
        let k = self.entry(addr);
        k.ltk = ltk;
        k.ediv = ediv;
        k.rand = u64::from_le_bytes(rand);
        k.key_size = key_size;
        k.key_mask |= KEY_MASK_ENC;
    }

    pub fn add_identity(&mut self, addr: BdAddr, irk: [u8; 16], addr_type: u8) {
        let k = self.entry(addr);
        k.irk = irk;
        k.addr_type = addr_type;
        k.key_mask |= KEY_MASK_ID;
    }

    pub fn add_signing(&mut self, addr: BdAddr, csrk: [u8; 16]) {
        let k = self.entry(addr);
        k.csrk = csrk;
        k.key_mask |= KEY_MASK_SIGN;
    }

    /// Collected keys for `addr`, if any arrived.
    pub fn take(&mut self, addr: BdAddr) -> Option<LinkKeys> {
        match self.keys.take() {
            Some(k) if k.addr == addr && k.key_mask != 0 => Some(k),
            Some(_) => {
                warn!("BLE: pairing with {} finished without its keys", addr);
                None
            }
            None => None,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Payload helpers
// ───────────────────────────────────────────────────────────────

/// Raw advertising data: flags plus the device name, shortened if it
/// does not fit.
pub fn advertising_payload(name: &str) -> heapless::Vec<u8, ADV_DATA_MAX> {
    let mut adv = heapless::Vec::new();
    let _ = adv.extend_from_slice(&[2, AD_TYPE_FLAGS, AD_FLAGS_LE_ONLY]);

    let room = ADV_DATA_MAX - adv.len() - 2;
    let bytes = name.as_bytes();
    let (ad_type, len) = if bytes.len() > room {
        (AD_TYPE_SHORT_NAME, room)
    } else {
        (AD_TYPE_COMPLETE_NAME, bytes.len())
    };
    if len > 0 {
        let _ = adv.push(len as u8 + 1);
        let _ = adv.push(ad_type);
        let _ = adv.extend_from_slice(&bytes[..len]);
    }
    adv
}

/// Bytes a successful response carries back to the peer.
pub fn response_payload(response: &AttResponse) -> &[u8] {
    match response {
        AttResponse::Read(v)
        | AttResponse::ReadMultiple(v)
        | AttResponse::ReadByType { data: v, .. }
        | AttResponse::PrepareWriteAck { value: v, .. } => v,
        AttResponse::WriteAck
        | AttResponse::ExecuteWriteAck
        | AttResponse::Mtu(_)
        | AttResponse::None => &[],
    }
}

// ───────────────────────────────────────────────────────────────
// Confirmation tracking
// ───────────────────────────────────────────────────────────────

/// Bluedroid reports both a sent notification and a confirmed indication
/// as `CONF_EVT`. Set while an indication is outstanding.
#[derive(Debug, Default)]
pub struct IndicationTracker {
    pending: core::sync::atomic::AtomicBool,
}

impl IndicationTracker {
    pub const fn new() -> Self {
        Self {
            pending: core::sync::atomic::AtomicBool::new(false),
        }
    }

    /// A send is about to go out. Notifications leave the flag alone.
    pub fn sending(&self, confirm: bool) {
        if confirm {
            self.pending.store(true, core::sync::atomic::Ordering::Relaxed);
        }
    }

    /// The stack refused the send.
    pub fn send_failed(&self, confirm: bool) {
        if confirm {
            self.pending.store(false, core::sync::atomic::Ordering::Relaxed);
        }
    }

    pub fn reset(&self) {
        self.pending.store(false, core::sync::atomic::Ordering::Relaxed);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(core::sync::atomic::Ordering::Relaxed)
    }

    /// Request a `CONF_EVT` stands for.
    pub fn classify(&self) -> GattRequest<'static> {
        if self.pending.swap(false, core::sync::atomic::Ordering::Relaxed) {
            GattRequest::ValueConfirmation
        } else {
            GattRequest::NotificationSent
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Link port
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering as AtomicOrdering};

// ── ESP-IDF BLE static state ──────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures. These statics bridge the callback context to the adapter.

#[cfg(target_os = "espidf")]
static BLE_GATTS_IF: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_CONNECTED: AtomicBool = AtomicBool::new(false);
#[cfg(target_os = "espidf")]
static BLE_MTU: AtomicU16 = AtomicU16::new(crate::gatt::att::ATT_DEFAULT_MTU);
#[cfg(target_os = "espidf")]
static BLE_SVC_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_CONTROL_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_CCCD_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_DATA_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_ADV_MIN: AtomicU16 = AtomicU16::new(0x20);
#[cfg(target_os = "espidf")]
static BLE_ADV_MAX: AtomicU16 = AtomicU16::new(0x40);
#[cfg(target_os = "espidf")]
static BLE_INDICATIONS: IndicationTracker = IndicationTracker::new();
#[cfg(target_os = "espidf")]
static BLE_ADV_DATA: std::sync::Mutex<heapless::Vec<u8, ADV_DATA_MAX>> =
    std::sync::Mutex::new(heapless::Vec::new());

/// Service state reachable from the Bluedroid callbacks.
#[cfg(target_os = "espidf")]
static BT_CONTEXT: std::sync::Mutex<Option<BtContext>> = std::sync::Mutex::new(None);

#[cfg(target_os = "espidf")]
fn handle_map() -> HandleMap {
    HandleMap {
        control: BLE_CONTROL_HANDLE.load(AtomicOrdering::Relaxed),
        cccd: BLE_CCCD_HANDLE.load(AtomicOrdering::Relaxed),
        data: BLE_DATA_HANDLE.load(AtomicOrdering::Relaxed),
    }
}

/// [`LinkPort`] over the GATT server interface.
#[derive(Debug, Default)]
pub struct BleLink {
    #[cfg(not(target_os = "espidf"))]
    connected: bool,
    #[cfg(not(target_os = "espidf"))]
    sent: u32,
}

impl BleLink {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(target_os = "espidf")]
    fn send(
        &mut self,
        conn_id: u16,
        handle: u16,
        value: &[u8],
        confirm: bool,
    ) -> Result<(), TransportError> {
        use esp_idf_svc::sys::*;

        if !BLE_CONNECTED.load(AtomicOrdering::Relaxed) {
            return Err(TransportError::NotConnected);
        }
        let Some(stack_handle) = handle_map().to_stack(handle) else {
            warn!("BLE: no stack handle for 0x{:04x}", handle);
            return Err(TransportError::SendFailed);
        };
        let gatts_if = BLE_GATTS_IF.load(AtomicOrdering::Relaxed) as esp_gatt_if_t;
        let mut buf: heapless::Vec<u8, 16> = heapless::Vec::new();
        buf.extend_from_slice(value)
            .map_err(|()| TransportError::SendFailed)?;

        BLE_INDICATIONS.sending(confirm);
        let ret = unsafe {
            esp_ble_gatts_send_indicate(
                gatts_if,
                conn_id,
                stack_handle,
                buf.len() as u16,
                buf.as_mut_ptr(),
                confirm,
            )
        };
        if ret != ESP_OK as i32 {
            BLE_INDICATIONS.send_failed(confirm);
            warn!("BLE: send_indicate failed ({})", ret);
            return Err(TransportError::SendFailed);
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn send(
        &mut self,
        conn_id: u16,
        handle: u16,
        value: &[u8],
        confirm: bool,
    ) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.sent += 1;
        info!(
            "BLE(sim): {} conn {} handle 0x{:04x} {:02x?}",
            if confirm { "indicate" } else { "notify" },
            conn_id,
            handle,
            value
        );
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Sends accepted by the simulated link.
    #[cfg(not(target_os = "espidf"))]
    pub fn sent(&self) -> u32 {
        self.sent
    }
}

impl LinkPort for BleLink {
    fn send_notification(
        &mut self,
        conn_id: u16,
        handle: u16,
        value: &[u8],
    ) -> Result<(), TransportError> {
        self.send(conn_id, handle, value, false)
    }

    fn send_indication(
        &mut self,
        conn_id: u16,
        handle: u16,
        value: &[u8],
    ) -> Result<(), TransportError> {
        self.send(conn_id, handle, value, true)
    }
}

// ───────────────────────────────────────────────────────────────
// Service context
// ───────────────────────────────────────────────────────────────

/// Everything a stack event may need, owned in one place.
pub struct BtContext {
    pub service: OtaService,
    pub engine: FlashUpdateEngine,
    pub link: BleLink,
    pub reset: DeferredReset,
    pub sink: LogEventSink,
    pub nvs: NvsAdapter,
    pub keys: PendingKeys,
}

// SAFETY: the context is only ever touched from the Bluedroid task, behind
// `BT_CONTEXT`'s mutex. The raw partition pointer inside the OTA writer
// is what keeps the auto-derive from applying.
#[cfg(target_os = "espidf")]
unsafe impl Send for BtContext {}

impl BtContext {
    pub fn new(service: OtaService, engine: FlashUpdateEngine, nvs: NvsAdapter) -> Self {
        Self {
            service,
            engine,
            link: BleLink::new(),
            reset: DeferredReset::default(),
            sink: LogEventSink::new(),
            nvs,
            keys: PendingKeys::default(),
        }
    }

    pub fn gatt(&mut self, event: &GattEvent<'_>) -> Result<AttResponse, GattStatus> {
        let mut io = Ports::new(
            &mut self.engine,
            &mut self.link,
            &mut self.reset,
            &mut self.sink,
        );
        self.service.handle_gatt_event(event, &mut io)
    }

    pub fn management(&mut self, event: &ManagementEvent) -> ManagementReply {
        self.service
            .handle_management_event(event, &mut self.nvs, &mut self.sink)
    }

    /// Release the update session; the context is unusable afterwards.
    pub fn shutdown(&mut self) {
        let mut io = Ports::new(
            &mut self.engine,
            &mut self.link,
            &mut self.reset,
            &mut self.sink,
        );
        self.service.shutdown(&mut io);
    }

    /// Pairing finished: report it and persist whatever keys arrived.
    pub fn pairing_complete(&mut self, peer: BdAddr, success: bool) {
        self.management(&ManagementEvent::PairingComplete { peer, success });
        self.management(&ManagementEvent::EncryptionStatus {
            peer,
            encrypted: success,
        });
        if !success {
            self.keys.take(peer);
            return;
        }
        if let Some(keys) = self.keys.take(peer) {
            let reply = self.management(&ManagementEvent::LinkKeysUpdated(keys));
            if !reply.is_success() {
                warn!("BLE: keys for {} not stored: {:?}", peer, reply);
            }
        }
    }
}

#[cfg(target_os = "espidf")]
fn with_context<T>(f: impl FnOnce(&mut BtContext) -> T) -> Option<T> {
    match BT_CONTEXT.lock() {
        Ok(mut guard) => guard.as_mut().map(f),
        Err(_) => {
            warn!("BLE: context lock poisoned");
            None
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Bluedroid callbacks
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
fn uuid128_to_esp(uuid: u128) -> esp_idf_svc::sys::esp_bt_uuid_t {
    let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    t.len = 16;
    t.uuid.uuid128 = uuid.to_le_bytes();
    t
}

#[cfg(target_os = "espidf")]
fn uuid16_to_esp(uuid: u16) -> esp_idf_svc::sys::esp_bt_uuid_t {
    let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    t.len = 2;
    t.uuid.uuid16 = uuid;
    t
}

#[cfg(target_os = "espidf")]
unsafe fn add_gatt_char(svc_handle: u16, uuid: u128, perm: u32, prop: u32) {
    use esp_idf_svc::sys::*;
    let mut char_uuid = uuid128_to_esp(uuid);
    // Null control block: every access is answered by the application.
    unsafe {
        esp_ble_gatts_add_char(
            svc_handle,
            &mut char_uuid,
            perm as esp_gatt_perm_t,
            prop as esp_gatt_char_prop_t,
            core::ptr::null_mut(),
            core::ptr::null_mut(),
        );
    }
}

#[cfg(target_os = "espidf")]
unsafe fn start_advertising() {
    use esp_idf_svc::sys::*;
    let mut adv_params = esp_ble_adv_params_t {
        adv_int_min: BLE_ADV_MIN.load(AtomicOrdering::Relaxed),
        adv_int_max: BLE_ADV_MAX.load(AtomicOrdering::Relaxed),
        adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
        own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
        channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
        adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
        ..unsafe { core::mem::zeroed() }
    };
    unsafe {
        esp_ble_gap_start_advertising(&mut adv_params);
    }
}

/// Answer a request the stack is waiting on.
#[cfg(target_os = "espidf")]
unsafe fn send_response(
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    conn_id: u16,
    trans_id: u32,
    stack_handle: u16,
    offset: u16,
    result: &Result<AttResponse, GattStatus>,
) {
    use esp_idf_svc::sys::*;

    let status = match result {
        Ok(_) => GattStatus::Success,
        Err(s) => *s,
    };
    let mut rsp: esp_gatt_rsp_t = unsafe { core::mem::zeroed() };
    if let Ok(response) = result {
        let payload = response_payload(response);
        unsafe {
            let len = payload.len().min(rsp.attr_value.value.len());
            rsp.attr_value.value[..len].copy_from_slice(&payload[..len]);
            rsp.attr_value.len = len as u16;
            rsp.attr_value.handle = stack_handle;
            rsp.attr_value.offset = offset;
        }
    }
    let ret = unsafe {
        esp_ble_gatts_send_response(
            gatts_if,
            conn_id,
            trans_id,
            status.code() as esp_gatt_status_t,
            &mut rsp,
        )
    };
    if ret != ESP_OK as i32 {
        warn!("BLE: send_response failed ({})", ret);
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gap_event_handler(
    event: esp_idf_svc::sys::esp_gap_ble_cb_event_t,
    param: *mut esp_idf_svc::sys::esp_ble_gap_cb_param_t,
) {
    use esp_idf_svc::sys::*;
    let param = unsafe { &mut *param };

    match event {
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_DATA_RAW_SET_COMPLETE_EVT => unsafe {
            start_advertising();
        },
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
            let on = unsafe { param.adv_start_cmpl.status } == esp_bt_status_t_ESP_BT_STATUS_SUCCESS;
            with_context(|ctx| ctx.management(&ManagementEvent::AdvertisingStateChanged { on }));
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
            with_context(|ctx| {
                ctx.management(&ManagementEvent::AdvertisingStateChanged { on: false })
            });
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_SEC_REQ_EVT => {
            let bda = unsafe { &mut param.ble_security.ble_req.bd_addr };
            let peer = BdAddr::new(*bda);
            let granted = with_context(|ctx| {
                ctx.management(&ManagementEvent::SecurityRequest { peer })
            })
            .is_some_and(|r| r == ManagementReply::SecurityGranted);
            unsafe {
                esp_ble_gap_security_rsp(bda.as_mut_ptr(), granted);
            }
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_KEY_EVT => {
            let key = unsafe { &param.ble_security.ble_key };
            let peer = BdAddr::new(key.bd_addr);
            let key_type = u32::from(key.key_type);
            with_context(|ctx| unsafe {
                if key_type == ESP_LE_KEY_PENC {
                    let k = &key.p_key_value.penc_key;
                    ctx.keys
                        .add_encryption(peer, k.ltk, k.ediv, k.rand, k.key_size);
                } else if key_type == ESP_LE_KEY_PID {
                    let k = &key.p_key_value.pid_key;
                    ctx.keys.add_identity(peer, k.irk, k.addr_type);
                } else if key_type == ESP_LE_KEY_PCSRK {
                    ctx.keys.add_signing(peer, key.p_key_value.pcsrk_key.csrk);
                }
            });
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_AUTH_CMPL_EVT => {
            let p = unsafe { &param.ble_security.auth_cmpl };
            let peer = BdAddr::new(p.bd_addr);
            if !p.success {
                warn!("BLE: authentication failed (reason={})", p.fail_reason);
            }
            with_context(|ctx| ctx.pairing_complete(peer, p.success));
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_UPDATE_CONN_PARAMS_EVT => {
            let p = unsafe { &param.update_conn_params };
            with_context(|ctx| {
                ctx.management(&ManagementEvent::ConnectionParamsUpdated {
                    peer: BdAddr::new(p.bda),
                    interval: p.conn_int,
                    latency: p.latency,
                    timeout: p.timeout,
                })
            });
        }
        _ => {}
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gatts_event_handler(
    event: esp_idf_svc::sys::esp_gatts_cb_event_t,
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    param: *mut esp_idf_svc::sys::esp_ble_gatts_cb_param_t,
) {
    use esp_idf_svc::sys::*;
    let param = unsafe { &mut *param };

    match event {
        esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
            BLE_GATTS_IF.store(u32::from(gatts_if), AtomicOrdering::Relaxed);
            info!("BLE GATTS: app registered (if={})", gatts_if);
            if let Ok(mut adv) = BLE_ADV_DATA.lock() {
                unsafe {
                    esp_ble_gap_config_adv_data_raw(adv.as_mut_ptr(), adv.len() as u32);
                }
            }
            let mut svc_id = esp_gatt_srvc_id_t {
                id: esp_gatt_id_t {
                    uuid: uuid128_to_esp(OTA_SERVICE_UUID),
                    inst_id: 0,
                },
                is_primary: true,
            };
            unsafe {
                esp_ble_gatts_create_service(gatts_if, &mut svc_id, 8);
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
            let svc_handle = unsafe { param.create.service_handle };
            BLE_SVC_HANDLE.store(svc_handle, AtomicOrdering::Relaxed);
            info!("BLE GATTS: service created (handle={})", svc_handle);
            unsafe {
                esp_ble_gatts_start_service(svc_handle);
                add_gatt_char(
                    svc_handle,
                    CHAR_CONTROL_POINT_UUID,
                    ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE,
                    ESP_GATT_CHAR_PROP_BIT_READ
                        | ESP_GATT_CHAR_PROP_BIT_WRITE
                        | ESP_GATT_CHAR_PROP_BIT_NOTIFY
                        | ESP_GATT_CHAR_PROP_BIT_INDICATE,
                );
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
            let handle = unsafe { param.add_char.attr_handle };
            let svc_handle = BLE_SVC_HANDLE.load(AtomicOrdering::Relaxed);
            if BLE_CONTROL_HANDLE.load(AtomicOrdering::Relaxed) == 0 {
                BLE_CONTROL_HANDLE.store(handle, AtomicOrdering::Relaxed);
                info!("BLE GATTS: control point (handle={})", handle);
                let mut cccd = uuid16_to_esp(0x2902);
                unsafe {
                    esp_ble_gatts_add_char_descr(
                        svc_handle,
                        &mut cccd,
                        (ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE) as esp_gatt_perm_t,
                        core::ptr::null_mut(),
                        core::ptr::null_mut(),
                    );
                }
            } else {
                BLE_DATA_HANDLE.store(handle, AtomicOrdering::Relaxed);
                info!("BLE GATTS: data char (handle={}), service ready", handle);
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_DESCR_EVT => {
            let handle = unsafe { param.add_char_descr.attr_handle };
            BLE_CCCD_HANDLE.store(handle, AtomicOrdering::Relaxed);
            info!("BLE GATTS: control point CCCD (handle={})", handle);
            unsafe {
                add_gatt_char(
                    BLE_SVC_HANDLE.load(AtomicOrdering::Relaxed),
                    CHAR_DATA_UUID,
                    ESP_GATT_PERM_WRITE,
                    ESP_GATT_CHAR_PROP_BIT_WRITE | ESP_GATT_CHAR_PROP_BIT_WRITE_NR,
                );
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
            let p = unsafe { &mut param.connect };
            let peer = BdAddr::new(p.remote_bda);
            BLE_CONNECTED.store(true, AtomicOrdering::Relaxed);
            BLE_MTU.store(crate::gatt::att::ATT_DEFAULT_MTU, AtomicOrdering::Relaxed);
            // The controller stops connectable advertising on its own.
            let known = with_context(|ctx| {
                let _ = ctx.gatt(&GattEvent::Connected {
                    conn_id: p.conn_id,
                    peer,
                });
                ctx.management(&ManagementEvent::LinkKeysRequested(peer))
            });
            if let Some(ManagementReply::LinkKeys(_)) = known {
                info!("BLE: {} is bonded, resuming encryption", peer);
                unsafe {
                    esp_ble_set_encryption(
                        p.remote_bda.as_mut_ptr(),
                        esp_ble_sec_act_t_ESP_BLE_SEC_ENCRYPT,
                    );
                }
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
            let p = unsafe { &param.disconnect };
            BLE_CONNECTED.store(false, AtomicOrdering::Relaxed);
            BLE_INDICATIONS.reset();
            with_context(|ctx| {
                ctx.gatt(&GattEvent::Disconnected {
                    conn_id: p.conn_id,
                    reason: p.reason as u8,
                })
            });
            unsafe {
                start_advertising();
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_MTU_EVT => {
            let p = unsafe { &param.mtu };
            BLE_MTU.store(p.mtu, AtomicOrdering::Relaxed);
            with_context(|ctx| {
                ctx.gatt(&GattEvent::Request {
                    conn_id: p.conn_id,
                    request: GattRequest::ExchangeMtu { client_mtu: p.mtu },
                })
            });
        }
        esp_gatts_cb_event_t_ESP_GATTS_READ_EVT => {
            let p = unsafe { &param.read };
            let result = match handle_map().to_local(p.handle) {
                Some(handle) => with_context(|ctx| {
                    ctx.gatt(&GattEvent::Request {
                        conn_id: p.conn_id,
                        request: GattRequest::Read {
                            handle,
                            offset: p.offset,
                            max_len: BLE_MTU.load(AtomicOrdering::Relaxed).saturating_sub(1),
                        },
                    })
                })
                .unwrap_or(Err(GattStatus::Error)),
                None => Err(GattStatus::InvalidHandle),
            };
            if p.need_rsp {
                unsafe {
                    send_response(gatts_if, p.conn_id, p.trans_id, p.handle, p.offset, &result);
                }
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
            let p = unsafe { &param.write };
            let value = if p.value.is_null() {
                &[][..]
            } else {
                unsafe { core::slice::from_raw_parts(p.value, p.len as usize) }
            };
            let result = match handle_map().to_local(p.handle) {
                Some(handle) => {
                    let request = if p.is_prep {
                        GattRequest::PrepareWrite {
                            handle,
                            offset: p.offset,
                            value,
                        }
                    } else {
                        GattRequest::Write {
                            handle,
                            offset: p.offset,
                            value,
                            kind: if p.need_rsp {
                                WriteKind::Request
                            } else {
                                WriteKind::Command
                            },
                        }
                    };
                    with_context(|ctx| {
                        ctx.gatt(&GattEvent::Request {
                            conn_id: p.conn_id,
                            request,
                        })
                    })
                    .unwrap_or(Err(GattStatus::Error))
                }
                None => Err(GattStatus::InvalidHandle),
            };
            if p.need_rsp {
                unsafe {
                    send_response(gatts_if, p.conn_id, p.trans_id, p.handle, p.offset, &result);
                }
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_EXEC_WRITE_EVT => {
            let p = unsafe { &param.exec_write };
            let commit = u32::from(p.exec_write_flag) == ESP_GATT_PREP_WRITE_EXEC;
            let result = with_context(|ctx| {
                ctx.gatt(&GattEvent::Request {
                    conn_id: p.conn_id,
                    request: GattRequest::ExecuteWrite { commit },
                })
            })
            .unwrap_or(Err(GattStatus::Error));
            unsafe {
                send_response(gatts_if, p.conn_id, p.trans_id, 0, 0, &result);
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONF_EVT => {
            let p = unsafe { &param.conf };
            let request = BLE_INDICATIONS.classify();
            with_context(|ctx| {
                ctx.gatt(&GattEvent::Request {
                    conn_id: p.conn_id,
                    request,
                })
            });
        }
        _ => {}
    }
}

// ───────────────────────────────────────────────────────────────
// BLE adapter
// ───────────────────────────────────────────────────────────────

pub struct BleAdapter {
    state: BleState,
    device_name: heapless::String<24>,
    adv_interval_min: u16,
    adv_interval_max: u16,
    mtu: u16,
    /// Simulation: the context stack events are delivered to.
    #[cfg(not(target_os = "espidf"))]
    sim: Option<BtContext>,
}

impl BleAdapter {
    pub fn new(config: &OtaConfig) -> Self {
        Self {
            state: BleState::Idle,
            device_name: config.device_name.clone(),
            adv_interval_min: config.adv_interval_min,
            adv_interval_max: config.adv_interval_max,
            mtu: config.mtu,
            #[cfg(not(target_os = "espidf"))]
            sim: None,
        }
    }

    pub fn state(&self) -> BleState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, BleState::Advertising | BleState::Connected)
    }

    /// Hand the service to the stack and start advertising.
    pub fn start(&mut self, ctx: BtContext) -> Result<(), BleError> {
        if self.is_active() {
            return Err(BleError::AlreadyStarted);
        }
        info!("BLE: starting advertising as '{}'", self.device_name);
        if let Err(e) = self.platform_start(ctx) {
            self.state = BleState::Failed;
            return Err(e);
        }
        self.state = BleState::Advertising;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.platform_stop();
        self.state = BleState::Idle;
        info!("BLE: stopped");
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_start(&mut self, ctx: BtContext) -> Result<(), BleError> {
        use esp_idf_svc::sys::*;

        if let Ok(mut slot) = BT_CONTEXT.lock() {
            *slot = Some(ctx);
        }
        if let Ok(mut adv) = BLE_ADV_DATA.lock() {
            *adv = advertising_payload(&self.device_name);
        }
        BLE_ADV_MIN.store(self.adv_interval_min, AtomicOrdering::Relaxed);
        BLE_ADV_MAX.store(self.adv_interval_max, AtomicOrdering::Relaxed);

        let check = |ret: esp_err_t, what: &str| {
            if ret == ESP_OK as i32 {
                Ok(())
            } else {
                log::error!("BLE: {} failed ({})", what, ret);
                Err(BleError::StackInitFailed(ret))
            }
        };

        unsafe {
            // Release classic BT memory (BLE-only mode saves ~30 KB).
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            check(esp_bt_controller_init(&mut bt_cfg), "bt_controller_init")?;
            check(
                esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE),
                "bt_controller_enable",
            )?;
            check(esp_bluedroid_init(), "bluedroid_init")?;
            check(esp_bluedroid_enable(), "bluedroid_enable")?;

            esp_ble_gap_register_callback(Some(ble_gap_event_handler));
            esp_ble_gatts_register_callback(Some(ble_gatts_event_handler));
            check(esp_ble_gatts_app_register(0), "gatts_app_register")?;
            check(esp_ble_gatt_set_local_mtu(self.mtu), "set_local_mtu")?;

            // Pairing parameters offered to every peer.
            let caps = crate::app::commands::IoCapabilities::default();
            let params: [(esp_ble_sm_param_t, u8); 5] = [
                (esp_ble_sm_param_t_ESP_BLE_SM_AUTHEN_REQ_MODE, caps.auth_req),
                (esp_ble_sm_param_t_ESP_BLE_SM_IOCAP_MODE, caps.io_cap),
                (esp_ble_sm_param_t_ESP_BLE_SM_MAX_KEY_SIZE, caps.max_key_size),
                (esp_ble_sm_param_t_ESP_BLE_SM_SET_INIT_KEY, caps.init_keys),
                (esp_ble_sm_param_t_ESP_BLE_SM_SET_RSP_KEY, caps.resp_keys),
            ];
            for (param, value) in params {
                esp_ble_gap_set_security_param(param, &value as *const u8 as *mut _, 1);
            }

            let mut name: heapless::Vec<u8, 25> = heapless::Vec::new();
            let _ = name.extend_from_slice(self.device_name.as_bytes());
            let _ = name.push(0);
            esp_ble_gap_set_device_name(name.as_ptr() as *const _);
        }

        info!(
            "BLE(espidf): Bluedroid stack initialized, advertising as '{}'",
            self.device_name
        );
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&mut self, ctx: BtContext) -> Result<(), BleError> {
        info!(
            "BLE(sim): advertising '{}' every {}-{} units, MTU {}",
            self.device_name, self.adv_interval_min, self.adv_interval_max, self.mtu
        );
        self.sim = Some(ctx);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_stop(&mut self) {
        use esp_idf_svc::sys::*;
        unsafe {
            esp_ble_gap_stop_advertising();
            esp_bluedroid_disable();
            esp_bluedroid_deinit();
            esp_bt_controller_disable();
            esp_bt_controller_deinit();
        }
        if let Ok(mut slot) = BT_CONTEXT.lock() {
            if let Some(mut ctx) = slot.take() {
                ctx.shutdown();
            }
        }
        info!("BLE(espidf): stack shut down");
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_stop(&mut self) {
        if let Some(mut ctx) = self.sim.take() {
            ctx.shutdown();
        }
        info!("BLE(sim): stopped");
    }

    // ── Simulation ────────────────────────────────────────────

    /// Deliver a GATT event as the stack would.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_gatt(&mut self, event: &GattEvent<'_>) -> Result<AttResponse, GattStatus> {
        let Some(ctx) = self.sim.as_mut() else {
            warn!("BLE(sim): event while stopped");
            return Err(GattStatus::Error);
        };
        match event {
            GattEvent::Connected { .. } => {
                ctx.link.set_connected(true);
                self.state = BleState::Connected;
            }
            GattEvent::Disconnected { .. } => {
                ctx.link.set_connected(false);
                self.state = BleState::Advertising;
            }
            GattEvent::Request { .. } => {}
        }
        ctx.gatt(event)
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sim_management(&mut self, event: &ManagementEvent) -> Option<ManagementReply> {
        self.sim.as_mut().map(|ctx| ctx.management(event))
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sim_context(&mut self) -> Option<&mut BtContext> {
        self.sim.as_mut()
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
