//! End-to-end update sessions through the control point.
//!
//! Every test drives the real attribute table, control point and host
//! flash engine; only the radio, reset and event sink are mocks.

use bleota::app::events::AppEvent;
use bleota::config::OtaConfig;
use bleota::gatt::att::{AttResponse, GattStatus};
use bleota::gatt::db::{CONTROL_POINT_HANDLE, DATA_HANDLE};
use bleota::ota::command::ControlCommand;
use bleota::ota::control_point::ControlState;
use bleota::ota::engine::image_crc32;

use crate::mock_ports::{EngineCall, Rig, Sent};

const OK: u8 = 0;
const BAD: u8 = 1;

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

/// Prepare, declare the size and stream `image` in `chunk`-sized writes.
fn download(rig: &mut Rig, image: &[u8], chunk: usize) {
    rig.command(ControlCommand::Prepare).unwrap();
    rig.command(ControlCommand::Download {
        total_size: image.len() as u32,
    })
    .unwrap();
    for (i, part) in image.chunks(chunk).enumerate() {
        rig.data(part, (i * chunk) as u16).unwrap();
    }
}

// ── QA-1: Happy path ──────────────────────────────────────────

#[test]
fn full_update_indicates_ok_and_resets_after_confirmation() {
    let mut rig = Rig::new();
    let img = image(1024);
    download(&mut rig, &img, 64);

    assert_eq!(rig.engine.received, img);
    assert_eq!(rig.link.notifications(), vec![OK, OK]);
    assert_eq!(rig.service.control_state(), ControlState::Downloading);

    let resp = rig.command(ControlCommand::Verify {
        crc32: image_crc32(&img),
    });
    assert_eq!(resp, Ok(AttResponse::WriteAck));
    assert_eq!(rig.service.control_state(), ControlState::Complete);
    assert_eq!(
        rig.link.last(),
        Some(&Sent::Indicate {
            handle: CONTROL_POINT_HANDLE,
            value: vec![OK],
        })
    );
    assert!(rig.reset.requests.is_empty(), "reset must wait for confirmation");

    rig.confirm().unwrap();
    assert_eq!(rig.reset.requests, vec![1000]);
    assert!(rig.sink.contains(&AppEvent::ResetScheduled { settle_ms: 1000 }));
}

#[test]
fn progress_events_track_every_chunk() {
    let mut rig = Rig::new();
    let img = image(256);
    download(&mut rig, &img, 64);

    let progress: Vec<u8> = rig
        .sink
        .events
        .iter()
        .filter_map(|e| match e {
            AppEvent::DownloadProgress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![25, 50, 75, 100]);
}

#[test]
fn state_changes_are_emitted_in_order() {
    let mut rig = Rig::new();
    let img = image(64);
    download(&mut rig, &img, 64);
    rig.command(ControlCommand::Verify {
        crc32: image_crc32(&img),
    })
    .unwrap();

    let transitions: Vec<(ControlState, ControlState)> = rig
        .sink
        .events
        .iter()
        .filter_map(|e| match e {
            AppEvent::StateChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (ControlState::Idle, ControlState::Preparing),
            (ControlState::Preparing, ControlState::Downloading),
            (ControlState::Downloading, ControlState::Verifying),
            (ControlState::Verifying, ControlState::Complete),
        ]
    );
    assert!(rig.sink.contains(&AppEvent::VerifyFinished { ok: true }));
}

#[test]
fn without_reboot_confirmation_stops_the_agent() {
    let config = OtaConfig {
        reboot_at_end: false,
        ..Default::default()
    };
    let mut rig = Rig::with_config(config);
    let img = image(128);
    download(&mut rig, &img, 32);
    rig.command(ControlCommand::Verify {
        crc32: image_crc32(&img),
    })
    .unwrap();

    rig.confirm().unwrap();
    assert!(rig.reset.requests.is_empty());
    assert_eq!(rig.engine.calls.last(), Some(&EngineCall::Stop));
    assert_eq!(rig.service.control_state(), ControlState::Idle);
}

// ── QA-2: CRC mismatch ────────────────────────────────────────

#[test]
fn crc_mismatch_indicates_bad_and_never_resets() {
    let mut rig = Rig::new();
    let img = image(1024);
    download(&mut rig, &img, 64);

    let resp = rig.command(ControlCommand::Verify { crc32: 0xDEAD_BEEF });
    assert_eq!(resp, Err(GattStatus::Error));
    assert_eq!(rig.service.control_state(), ControlState::Failed);
    assert_eq!(rig.link.indications(), vec![BAD]);
    assert!(rig.sink.contains(&AppEvent::VerifyFinished { ok: false }));

    rig.confirm().unwrap();
    assert!(rig.reset.requests.is_empty());
}

#[test]
fn verify_can_be_retried_after_failure() {
    let mut rig = Rig::new();
    let img = image(512);
    download(&mut rig, &img, 128);

    rig.command(ControlCommand::Verify { crc32: 0 }).unwrap_err();
    assert_eq!(rig.service.control_state(), ControlState::Failed);

    rig.command(ControlCommand::Verify {
        crc32: image_crc32(&img),
    })
    .unwrap();
    assert_eq!(rig.service.control_state(), ControlState::Complete);
    assert_eq!(rig.link.indications(), vec![BAD, OK]);
}

#[test]
fn verify_can_be_retried_after_bad_is_confirmed() {
    let mut rig = Rig::new();
    let img = image(256);
    download(&mut rig, &img, 64);

    rig.command(ControlCommand::Verify { crc32: 0xDEAD_BEEF })
        .unwrap_err();
    rig.confirm().unwrap();
    assert_eq!(rig.service.control_state(), ControlState::Failed);
    assert_eq!(rig.engine.count(|c| *c == EngineCall::Stop), 0);

    let resp = rig.command(ControlCommand::Verify {
        crc32: image_crc32(&img),
    });
    assert_eq!(resp, Ok(AttResponse::WriteAck));
    assert_eq!(rig.service.control_state(), ControlState::Complete);
    assert_eq!(rig.link.indications(), vec![BAD, OK]);

    rig.confirm().unwrap();
    assert_eq!(rig.reset.requests, vec![1000]);
}

#[test]
fn prepare_after_confirmed_failure_starts_fresh() {
    let mut rig = Rig::new();
    let img = image(256);
    download(&mut rig, &img, 64);
    rig.command(ControlCommand::Verify { crc32: 0 }).unwrap_err();
    rig.confirm().unwrap();

    download(&mut rig, &img, 128);
    assert_eq!(rig.engine.received, img);
    assert_eq!(rig.service.control_state(), ControlState::Downloading);
    rig.command(ControlCommand::Verify {
        crc32: image_crc32(&img),
    })
    .unwrap();
    assert_eq!(rig.service.control_state(), ControlState::Complete);
}

#[test]
fn incomplete_transfer_can_restart_after_confirmation() {
    let mut rig = Rig::new();
    let img = image(128);
    rig.command(ControlCommand::Prepare).unwrap();
    rig.command(ControlCommand::Download { total_size: 128 })
        .unwrap();
    rig.data(&img[..64], 0).unwrap();
    rig.command(ControlCommand::Verify {
        crc32: image_crc32(&img),
    })
    .unwrap_err();
    rig.confirm().unwrap();

    rig.command(ControlCommand::Prepare).unwrap();
    assert_eq!(rig.service.control_state(), ControlState::Preparing);
}

#[test]
fn verify_before_all_bytes_arrive_fails() {
    let mut rig = Rig::new();
    let img = image(256);
    rig.command(ControlCommand::Prepare).unwrap();
    rig.command(ControlCommand::Download { total_size: 256 })
        .unwrap();
    rig.data(&img[..128], 0).unwrap();

    let resp = rig.command(ControlCommand::Verify {
        crc32: image_crc32(&img),
    });
    assert_eq!(resp, Err(GattStatus::Error));
    assert_eq!(rig.service.control_state(), ControlState::Failed);
}

// ── QA-3: Abort ───────────────────────────────────────────────

#[test]
fn abort_mid_download_then_prepare_starts_fresh() {
    let mut rig = Rig::new();
    let img = image(512);
    rig.command(ControlCommand::Prepare).unwrap();
    rig.command(ControlCommand::Download { total_size: 512 })
        .unwrap();
    rig.data(&img[..64], 0).unwrap();

    rig.command(ControlCommand::Abort).unwrap();
    assert_eq!(rig.service.control_state(), ControlState::Aborted);
    assert_eq!(rig.engine.count(|c| *c == EngineCall::Abort), 1);

    download(&mut rig, &img, 64);
    rig.command(ControlCommand::Verify {
        crc32: image_crc32(&img),
    })
    .unwrap();
    assert_eq!(rig.service.control_state(), ControlState::Complete);
}

#[test]
fn abort_when_idle_stays_idle() {
    let mut rig = Rig::new();
    rig.command(ControlCommand::Abort).unwrap();
    assert_eq!(rig.service.control_state(), ControlState::Idle);
}

#[test]
fn prepare_is_accepted_again_while_preparing() {
    let mut rig = Rig::new();
    rig.command(ControlCommand::Prepare).unwrap();
    rig.command(ControlCommand::Prepare).unwrap();
    assert_eq!(rig.service.control_state(), ControlState::Preparing);
    assert_eq!(rig.link.notifications(), vec![OK, OK]);
}

// ── QA-4: Malformed and out-of-sequence commands ─────────────

#[test]
fn short_verify_never_reaches_the_engine() {
    let mut rig = Rig::new();
    let resp = rig.write(CONTROL_POINT_HANDLE, &[3, 0xAA, 0xBB, 0xCC]);
    assert_eq!(resp, Err(GattStatus::Error));
    assert!(!rig.engine.was_called());
}

#[test]
fn long_verify_is_rejected() {
    let mut rig = Rig::new();
    let resp = rig.write(CONTROL_POINT_HANDLE, &[3, 1, 2, 3, 4, 5]);
    assert_eq!(resp, Err(GattStatus::Error));
    assert!(!rig.engine.was_called());
}

#[test]
fn short_download_never_reaches_the_engine() {
    let mut rig = Rig::new();
    rig.command(ControlCommand::Prepare).unwrap();
    let calls = rig.engine.calls.len();
    let resp = rig.write(CONTROL_POINT_HANDLE, &[2, 0x00, 0x04]);
    assert_eq!(resp, Err(GattStatus::Error));
    assert_eq!(rig.engine.calls.len(), calls);
    assert_eq!(rig.service.control_state(), ControlState::Preparing);
}

#[test]
fn download_before_prepare_is_rejected() {
    let mut rig = Rig::new();
    let resp = rig.command(ControlCommand::Download { total_size: 1024 });
    assert_eq!(resp, Err(GattStatus::Error));
    assert!(!rig.engine.was_called());
    assert_eq!(rig.service.control_state(), ControlState::Idle);
}

#[test]
fn verify_before_download_is_rejected() {
    let mut rig = Rig::new();
    rig.command(ControlCommand::Prepare).unwrap();
    let resp = rig.command(ControlCommand::Verify { crc32: 0 });
    assert_eq!(resp, Err(GattStatus::Error));
    assert_eq!(rig.engine.count(|c| matches!(c, EngineCall::Verify { .. })), 0);
}

#[test]
fn unknown_opcode_is_request_not_supported() {
    let mut rig = Rig::new();
    assert_eq!(
        rig.write(CONTROL_POINT_HANDLE, &[9]),
        Err(GattStatus::RequestNotSupported)
    );
    assert!(!rig.engine.was_called());
}

#[test]
fn empty_control_write_is_rejected() {
    let mut rig = Rig::new();
    assert_eq!(rig.write(CONTROL_POINT_HANDLE, &[]), Err(GattStatus::Error));
}

#[test]
fn oversized_image_is_refused() {
    let mut rig = Rig::new();
    rig.command(ControlCommand::Prepare).unwrap();
    let resp = rig.command(ControlCommand::Download {
        total_size: u32::MAX,
    });
    assert_eq!(resp, Err(GattStatus::Error));
    assert_eq!(rig.service.control_state(), ControlState::Preparing);
}

#[test]
fn data_before_download_is_refused_by_engine() {
    let mut rig = Rig::new();
    assert_eq!(rig.data(&[1, 2, 3], 0), Err(GattStatus::Error));
}

#[test]
fn non_sequential_chunk_is_refused() {
    let mut rig = Rig::new();
    rig.command(ControlCommand::Prepare).unwrap();
    rig.command(ControlCommand::Download { total_size: 256 })
        .unwrap();
    rig.data(&[0; 64], 0).unwrap();
    assert_eq!(rig.data(&[0; 64], 128), Err(GattStatus::Error));
    assert_eq!(rig.engine.received.len(), 64);
}

#[test]
fn data_write_request_is_acknowledged() {
    let mut rig = Rig::new();
    rig.command(ControlCommand::Prepare).unwrap();
    rig.command(ControlCommand::Download { total_size: 4 })
        .unwrap();
    assert_eq!(rig.write(DATA_HANDLE, &[1, 2, 3, 4]), Ok(AttResponse::WriteAck));
}

// ── QA-5: Transport failures ──────────────────────────────────

#[test]
fn failed_notification_reports_error_but_keeps_state() {
    let mut rig = Rig::new();
    rig.link.fail = true;
    assert_eq!(rig.command(ControlCommand::Prepare), Err(GattStatus::Error));
    assert_eq!(rig.service.control_state(), ControlState::Preparing);
}

#[test]
fn engine_prepare_failure_leaves_control_idle() {
    let mut rig = Rig::new();
    rig.engine.fail_prepare = Some(bleota::error::EngineError::NoPartition);
    assert_eq!(rig.command(ControlCommand::Prepare), Err(GattStatus::Error));
    assert_eq!(rig.service.control_state(), ControlState::Idle);
    assert!(rig.link.sent.is_empty());
}
