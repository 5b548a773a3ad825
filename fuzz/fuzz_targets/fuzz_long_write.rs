//! Fuzz target: `LongWriteBuffer`
//!
//! Interprets the input as a stream of prepare-write chunks
//! `[offset_lo, offset_hi, len, data...]` and verifies:
//! - No panics under arbitrary offsets and lengths
//! - `written` only ever grows by accepted chunk lengths
//! - `written` never exceeds the buffer capacity
//! - Execute hands back exactly the accepted bytes
//!
//! cargo fuzz run fuzz_long_write

#![no_main]

use bleota::gatt::long_write::LongWriteBuffer;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut buf = LongWriteBuffer::new(64);
    let mut accepted: Vec<u8> = Vec::new();
    let mut rest = data;

    while rest.len() >= 3 {
        let offset = u16::from_le_bytes([rest[0], rest[1]]);
        let len = (rest[2] as usize).min(rest.len() - 3);
        let chunk = &rest[3..3 + len];
        rest = &rest[3 + len..];

        let before = buf.written();
        match buf.prepare(0x35, offset, chunk) {
            Ok(echo) => {
                assert_eq!(echo.as_slice(), chunk);
                accepted.extend_from_slice(chunk);
                assert_eq!(buf.written() as usize, before as usize + len);
            }
            Err(_) => assert_eq!(buf.written(), before),
        }
        assert!(buf.written() <= buf.capacity());
    }

    match buf.take() {
        Ok((handle, value)) => {
            assert_eq!(handle, 0x35);
            assert_eq!(value.as_slice(), accepted.as_slice());
        }
        Err(_) => assert!(accepted.is_empty()),
    }
});
