//! Fuzzes console log line classification with the default patterns.
//!
//! Run with:
//!   cargo +nightly fuzz run fuzz_tick_line
#![no_main]
use demoknight_core::seeker::{DEFAULT_END_PATTERN, DEFAULT_TICK_PATTERN, TickPatterns};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(patterns) = TickPatterns::new(DEFAULT_TICK_PATTERN, DEFAULT_END_PATTERN) else {
        return;
    };
    for line in String::from_utf8_lossy(data).lines() {
        let _ = patterns.parse(line);
    }
});
