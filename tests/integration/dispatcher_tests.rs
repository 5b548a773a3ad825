//! GATT dispatcher: reads, writes and long writes against the OTA table.

use bleota::app::events::AppEvent;
use bleota::gatt::att::{AttResponse, GattEvent, GattRequest, GattStatus, Uuid, WriteKind};
use bleota::gatt::connection::{BdAddr, ClientConfig};
use bleota::gatt::db::{
    APPEARANCE_HANDLE, CONTROL_POINT_CCCD_HANDLE, CONTROL_POINT_HANDLE, DATA_HANDLE,
    DEVICE_NAME_HANDLE, GAP_SERVICE_HANDLE,
};
use bleota::ota::control_point::ControlState;

use crate::mock_ports::{CONN_ID, PEER, Rig, Sent};

fn read(rig: &mut Rig, handle: u16, offset: u16, max_len: u16) -> Result<Vec<u8>, GattStatus> {
    match rig.request(GattRequest::Read {
        handle,
        offset,
        max_len,
    })? {
        AttResponse::Read(v) => Ok(v.to_vec()),
        other => panic!("unexpected response {:?}", other),
    }
}

fn prepare(rig: &mut Rig, handle: u16, offset: u16, value: &[u8]) -> Result<AttResponse, GattStatus> {
    rig.request(GattRequest::PrepareWrite {
        handle,
        offset,
        value,
    })
}

// ── Reads ─────────────────────────────────────────────────────

#[test]
fn read_device_name() {
    let mut rig = Rig::new();
    assert_eq!(read(&mut rig, DEVICE_NAME_HANDLE, 0, 22).unwrap(), b"OTA-BLE");
}

#[test]
fn read_blob_returns_tail_within_room() {
    let mut rig = Rig::new();
    assert_eq!(read(&mut rig, DEVICE_NAME_HANDLE, 4, 22).unwrap(), b"BLE");
    assert_eq!(read(&mut rig, DEVICE_NAME_HANDLE, 1, 2).unwrap(), b"TA");
}

#[test]
fn read_past_end_is_invalid_offset() {
    let mut rig = Rig::new();
    assert_eq!(
        read(&mut rig, DEVICE_NAME_HANDLE, 7, 22),
        Err(GattStatus::InvalidOffset)
    );
}

#[test]
fn read_unknown_handle_is_invalid_handle() {
    let mut rig = Rig::new();
    assert_eq!(read(&mut rig, 0x0099, 0, 22), Err(GattStatus::InvalidHandle));
}

#[test]
fn read_by_type_groups_equal_sized_declarations() {
    let mut rig = Rig::new();
    let resp = rig
        .request(GattRequest::ReadByType {
            start: GAP_SERVICE_HANDLE,
            end: 0xFFFF,
            uuid: Uuid::CHARACTERISTIC,
            max_len: 22,
        })
        .unwrap();
    let AttResponse::ReadByType { pair_len, data } = resp else {
        panic!("expected read-by-type response");
    };
    // Two 16-bit-UUID declarations; the 128-bit one that follows has a
    // different size and ends the response.
    assert_eq!(pair_len, 7);
    assert_eq!(data.len(), 14);
    assert_eq!(&data[0..2], &0x0002u16.to_le_bytes());
    assert_eq!(&data[3..5], &DEVICE_NAME_HANDLE.to_le_bytes());
    assert_eq!(&data[7..9], &0x0004u16.to_le_bytes());
    assert_eq!(&data[10..12], &APPEARANCE_HANDLE.to_le_bytes());
}

#[test]
fn read_by_type_starting_at_ota_service_finds_128_bit_declarations() {
    let mut rig = Rig::new();
    let resp = rig
        .request(GattRequest::ReadByType {
            start: 0x0030,
            end: 0xFFFF,
            uuid: Uuid::CHARACTERISTIC,
            max_len: 100,
        })
        .unwrap();
    let AttResponse::ReadByType { pair_len, data } = resp else {
        panic!("expected read-by-type response");
    };
    assert_eq!(pair_len, 21);
    assert_eq!(data.len(), 42);
    assert_eq!(&data[0..2], &0x0031u16.to_le_bytes());
    assert_eq!(&data[21..23], &0x0034u16.to_le_bytes());
}

#[test]
fn read_by_type_rejects_oversized_room() {
    let mut rig = Rig::new();
    let err = rig
        .request(GattRequest::ReadByType {
            start: 1,
            end: 0xFFFF,
            uuid: Uuid::CHARACTERISTIC,
            max_len: 600,
        })
        .unwrap_err();
    assert_eq!(err, GattStatus::InsufficientResources);
}

#[test]
fn read_by_type_without_match_is_invalid_handle() {
    let mut rig = Rig::new();
    let err = rig
        .request(GattRequest::ReadByType {
            start: 0x0040,
            end: 0x0050,
            uuid: Uuid::CHARACTERISTIC,
            max_len: 22,
        })
        .unwrap_err();
    assert_eq!(err, GattStatus::InvalidHandle);
}

#[test]
fn read_multiple_concatenates_values() {
    let mut rig = Rig::new();
    let handles = [DEVICE_NAME_HANDLE, APPEARANCE_HANDLE];
    let resp = rig
        .request(GattRequest::ReadMultiple {
            handles: &handles,
            variable: false,
            max_len: 22,
        })
        .unwrap();
    assert_eq!(
        resp,
        AttResponse::ReadMultiple(heapless::Vec::from_slice(b"OTA-BLE\0\0").unwrap())
    );
}

#[test]
fn read_multiple_variable_prefixes_lengths() {
    let mut rig = Rig::new();
    let handles = [DEVICE_NAME_HANDLE, APPEARANCE_HANDLE];
    let AttResponse::ReadMultiple(data) = rig
        .request(GattRequest::ReadMultiple {
            handles: &handles,
            variable: true,
            max_len: 22,
        })
        .unwrap()
    else {
        panic!("expected read-multiple response");
    };
    let mut expected = vec![7, 0];
    expected.extend_from_slice(b"OTA-BLE");
    expected.extend_from_slice(&[2, 0, 0, 0]);
    assert_eq!(data.as_slice(), expected.as_slice());
}

#[test]
fn read_multiple_truncates_last_value() {
    let mut rig = Rig::new();
    let handles = [DEVICE_NAME_HANDLE, APPEARANCE_HANDLE];
    let AttResponse::ReadMultiple(data) = rig
        .request(GattRequest::ReadMultiple {
            handles: &handles,
            variable: false,
            max_len: 5,
        })
        .unwrap()
    else {
        panic!("expected read-multiple response");
    };
    assert_eq!(data.as_slice(), b"OTA-B");
}

#[test]
fn read_multiple_with_unknown_handle_is_unlikely_error() {
    let mut rig = Rig::new();
    let handles = [DEVICE_NAME_HANDLE, 0x0077];
    let err = rig
        .request(GattRequest::ReadMultiple {
            handles: &handles,
            variable: false,
            max_len: 22,
        })
        .unwrap_err();
    assert_eq!(err, GattStatus::ErrUnlikely);
}

// ── Writes ────────────────────────────────────────────────────

#[test]
fn cccd_write_is_stored_and_tracked() {
    let mut rig = Rig::new();
    assert_eq!(
        rig.write(CONTROL_POINT_CCCD_HANDLE, &[0x02, 0x00]),
        Ok(AttResponse::WriteAck)
    );
    assert_eq!(read(&mut rig, CONTROL_POINT_CCCD_HANDLE, 0, 22).unwrap(), [2, 0]);
    let conn = rig.service.dispatcher().connection().unwrap();
    assert_eq!(conn.client_config, ClientConfig::Indicate);
}

#[test]
fn empty_cccd_write_is_invalid_length() {
    let mut rig = Rig::new();
    assert_eq!(
        rig.write(CONTROL_POINT_CCCD_HANDLE, &[]),
        Err(GattStatus::InvalidAttrLen)
    );
}

#[test]
fn write_command_gets_no_response() {
    let mut rig = Rig::new();
    let resp = rig.request(GattRequest::Write {
        handle: DEVICE_NAME_HANDLE,
        offset: 0,
        value: b"renamed",
        kind: WriteKind::Command,
    });
    assert_eq!(resp, Ok(AttResponse::None));
    assert_eq!(read(&mut rig, DEVICE_NAME_HANDLE, 0, 22).unwrap(), b"renamed");
}

#[test]
fn oversized_write_is_invalid_length() {
    let mut rig = Rig::new();
    assert_eq!(
        rig.write(DEVICE_NAME_HANDLE, &[b'x'; 25]),
        Err(GattStatus::InvalidAttrLen)
    );
}

#[test]
fn write_to_unknown_handle_is_invalid_handle() {
    let mut rig = Rig::new();
    assert_eq!(rig.write(0x0099, &[1]), Err(GattStatus::InvalidHandle));
}

// ── Long writes ───────────────────────────────────────────────

#[test]
fn long_write_reassembles_and_commits() {
    let mut rig = Rig::new();
    let resp = prepare(&mut rig, DEVICE_NAME_HANDLE, 0, b"long-").unwrap();
    assert_eq!(
        resp,
        AttResponse::PrepareWriteAck {
            handle: DEVICE_NAME_HANDLE,
            offset: 0,
            value: heapless::Vec::from_slice(b"long-").unwrap(),
        }
    );
    prepare(&mut rig, DEVICE_NAME_HANDLE, 5, b"name").unwrap();
    assert_eq!(
        rig.request(GattRequest::ExecuteWrite { commit: true }),
        Ok(AttResponse::ExecuteWriteAck)
    );
    assert_eq!(read(&mut rig, DEVICE_NAME_HANDLE, 0, 22).unwrap(), b"long-name");
    assert!(!rig.service.dispatcher().long_write().is_active());
}

#[test]
fn out_of_order_prepare_is_rejected() {
    let mut rig = Rig::new();
    prepare(&mut rig, DEVICE_NAME_HANDLE, 0, b"abcd").unwrap();
    assert_eq!(
        prepare(&mut rig, DEVICE_NAME_HANDLE, 6, b"ef"),
        Err(GattStatus::Error)
    );
    assert_eq!(rig.service.dispatcher().long_write().written(), 4);
}

#[test]
fn execute_without_prepare_is_rejected() {
    let mut rig = Rig::new();
    assert_eq!(
        rig.request(GattRequest::ExecuteWrite { commit: true }),
        Err(GattStatus::Error)
    );
}

#[test]
fn execute_cancel_drops_prepared_data() {
    let mut rig = Rig::new();
    prepare(&mut rig, DEVICE_NAME_HANDLE, 0, b"discard").unwrap();
    assert_eq!(
        rig.request(GattRequest::ExecuteWrite { commit: false }),
        Ok(AttResponse::ExecuteWriteAck)
    );
    assert_eq!(read(&mut rig, DEVICE_NAME_HANDLE, 0, 22).unwrap(), b"OTA-BLE");
    assert!(!rig.service.dispatcher().long_write().is_active());
}

#[test]
fn long_write_to_control_point_runs_the_command() {
    let mut rig = Rig::new();
    prepare(&mut rig, CONTROL_POINT_HANDLE, 0, &[1]).unwrap();
    rig.request(GattRequest::ExecuteWrite { commit: true })
        .unwrap();
    assert_eq!(rig.service.control_state(), ControlState::Preparing);
    assert_eq!(
        rig.link.last(),
        Some(&Sent::Notify {
            handle: CONTROL_POINT_HANDLE,
            value: vec![0],
        })
    );
}

#[test]
fn disconnect_clears_half_finished_long_write() {
    let mut rig = Rig::new();
    prepare(&mut rig, DATA_HANDLE, 0, &[0; 16]).unwrap();
    rig.event(&GattEvent::Disconnected {
        conn_id: CONN_ID,
        reason: 0x13,
    })
    .unwrap();
    assert!(!rig.service.dispatcher().long_write().is_active());
    assert!(rig.service.dispatcher().connection().is_none());
    assert!(rig.sink.contains(&AppEvent::Disconnected {
        conn_id: CONN_ID,
        reason: 0x13
    }));
}

#[test]
fn disconnect_resets_cccd() {
    let mut rig = Rig::new();
    rig.write(CONTROL_POINT_CCCD_HANDLE, &[1, 0]).unwrap();
    rig.event(&GattEvent::Disconnected {
        conn_id: CONN_ID,
        reason: 0x08,
    })
    .unwrap();
    assert_eq!(read(&mut rig, CONTROL_POINT_CCCD_HANDLE, 0, 22).unwrap(), [0, 0]);
}

#[test]
fn late_disconnect_of_replaced_link_keeps_current_link() {
    let mut rig = Rig::new();
    let other = BdAddr::new([0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x01]);
    rig.event(&GattEvent::Connected {
        conn_id: CONN_ID + 1,
        peer: other,
    })
    .unwrap();
    prepare(&mut rig, DATA_HANDLE, 0, &[0; 8]).unwrap();
    rig.write(CONTROL_POINT_CCCD_HANDLE, &[1, 0]).unwrap();

    rig.event(&GattEvent::Disconnected {
        conn_id: CONN_ID,
        reason: 0x13,
    })
    .unwrap();
    let conn = rig.service.dispatcher().connection().unwrap();
    assert_eq!(conn.conn_id, CONN_ID + 1);
    assert!(rig.service.dispatcher().long_write().is_active());
    assert_eq!(read(&mut rig, CONTROL_POINT_CCCD_HANDLE, 0, 22).unwrap(), [1, 0]);
}

// ── Misc ──────────────────────────────────────────────────────

#[test]
fn mtu_exchange_answers_server_mtu() {
    let mut rig = Rig::new();
    assert_eq!(
        rig.request(GattRequest::ExchangeMtu { client_mtu: 185 }),
        Ok(AttResponse::Mtu(512))
    );
}

#[test]
fn unsupported_opcode_is_not_supported() {
    let mut rig = Rig::new();
    assert_eq!(
        rig.request(GattRequest::Unsupported { opcode: 0x10 }),
        Err(GattStatus::RequestNotSupported)
    );
}

#[test]
fn notification_sent_is_accepted_silently() {
    let mut rig = Rig::new();
    assert_eq!(
        rig.request(GattRequest::NotificationSent),
        Ok(AttResponse::None)
    );
}

#[test]
fn second_connect_replaces_the_first() {
    let mut rig = Rig::new();
    let other = BdAddr::new([1, 2, 3, 4, 5, 6]);
    rig.event(&GattEvent::Connected {
        conn_id: 2,
        peer: other,
    })
    .unwrap();
    let conn = rig.service.dispatcher().connection().unwrap();
    assert_eq!(conn.conn_id, 2);
    assert_eq!(conn.peer, other);
    assert!(rig.sink.contains(&AppEvent::Connected {
        conn_id: CONN_ID,
        peer: PEER
    }));
}
