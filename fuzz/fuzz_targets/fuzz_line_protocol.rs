//! Fuzz target for line protocol encoding.
//!
//! Measurement, tag, and field tokens come straight off a remote wire, so
//! encoding must never panic and must never emit more lines than points.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tsdb_sync::adapters::lineproto::encode;
use tsdb_sync::point::DataPoint;

fuzz_target!(|data: (String, String, String, i64)| {
    let (measurement, tag, text, nanos) = data;

    let point = DataPoint::new(measurement, nanos)
        .with_tag("t", tag)
        .with_field("s", text)
        .with_field("v", 1i64);

    // Should never panic
    let encoded = encode(&[point]);

    // The timestamp is always the final token
    assert!(encoded.ends_with(&format!(" {nanos}")));
});
