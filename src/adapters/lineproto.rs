//! Line protocol encoding.
//!
//! All three write paths ship batches as line protocol:
//!
//! ```text
//! measurement,tag1=v1,tag2=v2 field1=1.5,field2=42i,field3="text" 1717243200000000000
//! ```
//!
//! Tags and fields are emitted in sorted key order so encoded batches are
//! deterministic. A point with no fields is dropped (the protocol requires
//! at least one field per line).

use crate::point::{DataPoint, FieldValue};
use std::fmt::Write as _;
use tracing::warn;

/// Encode a batch of points, one line per point, newline separated.
pub fn encode(points: &[DataPoint]) -> String {
    let mut out = String::new();
    for point in points {
        if point.fields.is_empty() {
            warn!(measurement = %point.measurement, "point has no fields, dropping");
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        encode_point(&mut out, point);
    }
    out
}

fn encode_point(out: &mut String, point: &DataPoint) {
    out.push_str(&escape_measurement(&point.measurement));

    let mut tags: Vec<_> = point.tags.iter().collect();
    tags.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in tags {
        out.push(',');
        out.push_str(&escape_token(key));
        out.push('=');
        out.push_str(&escape_token(value));
    }

    out.push(' ');
    let mut fields: Vec<_> = point.fields.iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));
    for (i, (key, value)) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape_token(key));
        out.push('=');
        encode_field_value(out, value);
    }

    let _ = write!(out, " {}", point.timestamp_nanos);
}

fn encode_field_value(out: &mut String, value: &FieldValue) {
    match value {
        FieldValue::Float(v) => {
            let _ = write!(out, "{v}");
        }
        FieldValue::Integer(v) => {
            let _ = write!(out, "{v}i");
        }
        FieldValue::Boolean(v) => {
            out.push_str(if *v { "true" } else { "false" });
        }
        FieldValue::Text(v) => {
            out.push('"');
            for c in v.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        }
    }
}

/// Measurement names escape commas and spaces.
fn escape_measurement(s: &str) -> String {
    escape_chars(s, &[',', ' '])
}

/// Tag keys, tag values, and field keys escape commas, equals, and spaces.
fn escape_token(s: &str) -> String {
    escape_chars(s, &[',', '=', ' '])
}

fn escape_chars(s: &str, specials: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if specials.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
