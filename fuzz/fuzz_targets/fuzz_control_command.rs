//! Fuzz target: control-point command decoder
//!
//! Feeds arbitrary bytes to `ControlCommand::decode` and checks:
//! - No panics on any input
//! - Every accepted command re-encodes to the prefix it was decoded from
//! - Verify is only accepted at exactly 5 bytes
//!
//! cargo fuzz run fuzz_control_command

#![no_main]

use bleota::ota::command::{ControlCommand, OPCODE_VERIFY};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(command) = ControlCommand::decode(data) else {
        return;
    };

    let encoded = command.encode();
    assert!(
        data.starts_with(&encoded),
        "decode/encode mismatch for {:?}",
        command
    );

    if data[0] == OPCODE_VERIFY {
        assert_eq!(data.len(), 5, "verify accepted at {} bytes", data.len());
    }
});
