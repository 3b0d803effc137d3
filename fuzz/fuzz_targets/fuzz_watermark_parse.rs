//! Fuzz target for resume-file timestamp parsing.
//!
//! The resume file is user-writable, so parsing must never panic on
//! arbitrary contents, and anything that parses must round-trip.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tsdb_sync::watermark::{format_nanos, parse_rfc3339_nanos};

fuzz_target!(|data: &str| {
    // Should never panic
    if let Some(nanos) = parse_rfc3339_nanos(data) {
        // Anything accepted must survive a format/parse round trip
        let formatted = format_nanos(nanos);
        assert_eq!(parse_rfc3339_nanos(&formatted), Some(nanos));
    }
});
