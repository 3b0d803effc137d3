//! Point data model shared by the engine and the protocol adapters.
//!
//! A [`DataPoint`] is the unit of copied data: one measurement row with its
//! tag set, field set, and nanosecond timestamp. Adapters produce points on
//! the read side and consume them on the write side; the engine never
//! inspects field contents, it only moves batches and tracks timestamps.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A scalar field value.
///
/// InfluxDB fields are one of four scalar types. Integers are kept distinct
/// from floats so the write side can round-trip the `i` suffix in line
/// protocol instead of silently widening. `Integer` is declared before
/// `Float` so untagged deserialization keeps whole numbers integral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(String),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// One time-series point: measurement, tags, fields, timestamp.
///
/// Immutable once constructed; ownership transfers to the target adapter on
/// write and the engine never mutates a batch after handing it over.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// Measurement (table) this point belongs to.
    pub measurement: String,
    /// Indexed string dimensions. Keys unique, order insignificant.
    pub tags: HashMap<String, String>,
    /// Scalar values. Keys unique, order insignificant.
    pub fields: HashMap<String, FieldValue>,
    /// Unix epoch nanoseconds.
    pub timestamp_nanos: i64,
}

impl DataPoint {
    /// Create a point with empty tag and field sets.
    pub fn new(measurement: impl Into<String>, timestamp_nanos: i64) -> Self {
        Self {
            measurement: measurement.into(),
            tags: HashMap::new(),
            fields: HashMap::new(),
            timestamp_nanos,
        }
    }

    /// Add a tag (builder style, used heavily in tests and adapters).
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a field (builder style).
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// One page of points returned by `DataSource::query_points`.
///
/// `max_timestamp_nanos` is the largest point time in `points`, or the
/// caller's unchanged `since` cursor when the page is empty. The pagination
/// driver relies on this pair for forward progress and termination.
#[derive(Debug, Clone, Default)]
pub struct QueryBatch {
    pub points: Vec<DataPoint>,
    pub max_timestamp_nanos: i64,
}

impl QueryBatch {
    /// An empty batch that leaves the cursor where it was.
    pub fn empty(since_nanos: i64) -> Self {
        Self {
            points: Vec::new(),
            max_timestamp_nanos: since_nanos,
        }
    }
}
