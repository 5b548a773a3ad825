//! Security-manager events through the service and the NVS-backed bond
//! table.

use bleota::app::commands::{IoCapabilities, ManagementEvent, ManagementReply};
use bleota::app::events::AppEvent;
use bleota::bonding::{BOND_MAX, IdentityKeys, LinkKeys};
use bleota::config::OtaConfig;
use bleota::error::BondError;
use bleota::gatt::connection::BdAddr;

use crate::mock_ports::{MockNvs, Rig};

fn peer(n: u8) -> BdAddr {
    BdAddr::new([0xC0, 0xFF, 0xEE, 0x00, 0x00, n])
}

fn keys(n: u8) -> LinkKeys {
    LinkKeys {
        key_mask: 0x03,
        ltk: [n; 16],
        ediv: u16::from(n) * 100,
        rand: u64::from(n) << 32,
        ..LinkKeys::new(peer(n))
    }
}

fn manage(rig: &mut Rig, event: ManagementEvent) -> ManagementReply {
    rig.service
        .handle_management_event(&event, &mut rig.nvs, &mut rig.sink)
}

// ── Storing ───────────────────────────────────────────────────

#[test]
fn pairing_keys_are_stored_and_announced() {
    let mut rig = Rig::new();
    let reply = manage(&mut rig, ManagementEvent::LinkKeysUpdated(keys(1)));
    assert_eq!(reply, ManagementReply::Ack);
    assert_eq!(rig.service.bonds().len(), 1);
    assert!(rig.sink.contains(&AppEvent::BondStored(peer(1))));
}

#[test]
fn fifth_peer_is_refused_when_table_full() {
    let mut rig = Rig::new();
    for n in 0..BOND_MAX as u8 {
        assert!(manage(&mut rig, ManagementEvent::LinkKeysUpdated(keys(n))).is_success());
    }

    let reply = manage(&mut rig, ManagementEvent::LinkKeysUpdated(keys(9)));
    assert_eq!(reply, ManagementReply::Failed(BondError::TableFull));
    assert!(rig.sink.contains(&AppEvent::BondTableFull(peer(9))));
    assert_eq!(rig.service.bonds().len(), BOND_MAX);
    assert!(rig.service.bonds().find(&peer(9)).is_none());
    // Existing peers are untouched.
    assert_eq!(rig.service.bonds().find(&peer(0)), Some(&keys(0)));
}

#[test]
fn known_peer_rebonds_in_place_even_when_full() {
    let mut rig = Rig::new();
    for n in 0..BOND_MAX as u8 {
        manage(&mut rig, ManagementEvent::LinkKeysUpdated(keys(n)));
    }
    let mut fresh = keys(2);
    fresh.ltk = [0xAB; 16];

    assert_eq!(
        manage(&mut rig, ManagementEvent::LinkKeysUpdated(fresh)),
        ManagementReply::Ack
    );
    assert_eq!(rig.service.bonds().len(), BOND_MAX);
    assert_eq!(rig.service.bonds().find(&peer(2)).unwrap().ltk, [0xAB; 16]);
}

#[test]
fn storage_failure_is_reported_and_table_unchanged() {
    let mut rig = Rig::new();
    rig.nvs.fail_writes = true;
    assert_eq!(
        manage(&mut rig, ManagementEvent::LinkKeysUpdated(keys(1))),
        ManagementReply::Failed(BondError::Storage)
    );
    assert!(rig.service.bonds().is_empty());
    assert!(!rig.sink.contains(&AppEvent::BondStored(peer(1))));
}

// ── Lookups ───────────────────────────────────────────────────

#[test]
fn key_request_for_bonded_peer_returns_keys() {
    let mut rig = Rig::new();
    manage(&mut rig, ManagementEvent::LinkKeysUpdated(keys(3)));
    assert_eq!(
        manage(&mut rig, ManagementEvent::LinkKeysRequested(peer(3))),
        ManagementReply::LinkKeys(keys(3))
    );
}

#[test]
fn key_request_matches_the_full_address() {
    let mut rig = Rig::new();
    manage(&mut rig, ManagementEvent::LinkKeysUpdated(keys(3)));
    let near_miss = BdAddr::new([0xC0, 0xFF, 0xEE, 0x00, 0x01, 3]);
    assert_eq!(
        manage(&mut rig, ManagementEvent::LinkKeysRequested(near_miss)),
        ManagementReply::Failed(BondError::NotFound)
    );
}

#[test]
fn identity_keys_round_trip() {
    let mut rig = Rig::new();
    assert_eq!(
        manage(&mut rig, ManagementEvent::LocalIdentityKeysRequested),
        ManagementReply::Failed(BondError::NoIdentityKeys)
    );

    let id = IdentityKeys {
        key_type_mask: 0x02,
        irk: [0x11; 16],
        dhk: [0x22; 16],
        er: [0x33; 16],
    };
    assert_eq!(
        manage(&mut rig, ManagementEvent::LocalIdentityKeysUpdated(id)),
        ManagementReply::Ack
    );
    assert_eq!(
        manage(&mut rig, ManagementEvent::LocalIdentityKeysRequested),
        ManagementReply::IdentityKeys(id)
    );
}

// ── Persistence ───────────────────────────────────────────────

#[test]
fn bonds_survive_restart() {
    let mut rig = Rig::new();
    manage(&mut rig, ManagementEvent::LinkKeysUpdated(keys(1)));
    manage(&mut rig, ManagementEvent::LinkKeysUpdated(keys(2)));
    let id = IdentityKeys {
        key_type_mask: 0x01,
        ..Default::default()
    };
    manage(&mut rig, ManagementEvent::LocalIdentityKeysUpdated(id));

    let nvs = rig.nvs.clone();
    let mut rebooted = Rig::with_nvs(OtaConfig::default(), nvs);
    assert!(rebooted.sink.contains(&AppEvent::Started { bonds: 2 }));
    assert_eq!(
        manage(&mut rebooted, ManagementEvent::LinkKeysRequested(peer(2))),
        ManagementReply::LinkKeys(keys(2))
    );
    assert_eq!(
        manage(&mut rebooted, ManagementEvent::LocalIdentityKeysRequested),
        ManagementReply::IdentityKeys(id)
    );
}

#[test]
fn corrupted_slot_is_skipped_on_restart() {
    let mut rig = Rig::new();
    manage(&mut rig, ManagementEvent::LinkKeysUpdated(keys(1)));
    let mut nvs: MockNvs = rig.nvs.clone();
    nvs.poke("bonds", "count", &2u32.to_le_bytes());
    nvs.poke("bonds", "b1", &[0xFF; 3]);

    let rebooted = Rig::with_nvs(OtaConfig::default(), nvs);
    assert_eq!(rebooted.service.bonds().len(), 1);
    assert!(rebooted.service.bonds().find(&peer(1)).is_some());
}

#[test]
fn pairing_after_corrupt_slot_never_drops_a_bonded_peer() {
    let mut rig = Rig::new();
    manage(&mut rig, ManagementEvent::LinkKeysUpdated(keys(1)));
    manage(&mut rig, ManagementEvent::LinkKeysUpdated(keys(2)));
    let mut nvs: MockNvs = rig.nvs.clone();
    nvs.poke("bonds", "b0", &[0xFF]);

    let mut rebooted = Rig::with_nvs(OtaConfig::default(), nvs);
    assert_eq!(
        manage(&mut rebooted, ManagementEvent::LinkKeysUpdated(keys(3))),
        ManagementReply::Ack
    );

    let again = Rig::with_nvs(OtaConfig::default(), rebooted.nvs.clone());
    assert_eq!(again.service.bonds().len(), 2);
    assert_eq!(again.service.bonds().find(&peer(2)), Some(&keys(2)));
    assert_eq!(again.service.bonds().find(&peer(3)), Some(&keys(3)));
}

// ── Pairing negotiation ───────────────────────────────────────

#[test]
fn io_caps_request_offers_bonding_without_io() {
    let mut rig = Rig::new();
    assert_eq!(
        manage(&mut rig, ManagementEvent::PairingIoCapsRequest { peer: peer(1) }),
        ManagementReply::IoCaps(IoCapabilities::default())
    );
}

#[test]
fn security_request_is_granted() {
    let mut rig = Rig::new();
    assert_eq!(
        manage(&mut rig, ManagementEvent::SecurityRequest { peer: peer(1) }),
        ManagementReply::SecurityGranted
    );
}

#[test]
fn status_events_are_acknowledged() {
    let mut rig = Rig::new();
    for event in [
        ManagementEvent::PairingComplete {
            peer: peer(1),
            success: false,
        },
        ManagementEvent::EncryptionStatus {
            peer: peer(1),
            encrypted: true,
        },
        ManagementEvent::AdvertisingStateChanged { on: true },
    ] {
        assert_eq!(manage(&mut rig, event), ManagementReply::Ack);
    }
    assert!(rig.service.bonds().is_empty());
}

#[test]
fn connection_params_update_records_peer() {
    let mut rig = Rig::new();
    assert_eq!(rig.service.last_param_peer(), None);
    manage(
        &mut rig,
        ManagementEvent::ConnectionParamsUpdated {
            peer: peer(4),
            interval: 24,
            latency: 0,
            timeout: 400,
        },
    );
    assert_eq!(rig.service.last_param_peer(), Some(peer(4)));
}
