//! Fuzzes the RCON packet decoder.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_decode_packet
#![no_main]
use demoknight_rcon::{decode_packet, encode_packet};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Errors are expected, panics are not.
    let Ok(Some((packet, consumed))) = decode_packet(data) else {
        return;
    };
    assert!(consumed <= data.len());

    // A decoded packet is canonical: encoding it decodes to the same packet.
    if let Ok(encoded) = encode_packet(&packet) {
        let again = decode_packet(&encoded).ok().flatten();
        assert_eq!(again, Some((packet, encoded.len())));
    }
});
