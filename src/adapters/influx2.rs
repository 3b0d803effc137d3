//! InfluxDB 2.x adapter: Flux over HTTP.
//!
//! Reads go through `POST /api/v2/query` with annotated-CSV responses;
//! measurement and tag-key discovery use the `influxdata/influxdb/schema`
//! Flux package; writes ship line protocol to `POST /api/v2/write`. Buckets
//! play the role of databases: when one is configured it is the whole
//! discovery result, otherwise `GET /api/v2/buckets` lists them.
//!
//! Flux returns one row per field per timestamp, so point reads pivot rows
//! back into tag/field points grouped by timestamp before handing them to
//! the engine.

use crate::adapters::lineproto;
use crate::backend::{BoxFuture, DataSource, DataTarget};
use crate::error::{Result, SyncError};
use crate::point::{DataPoint, FieldValue, QueryBatch};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Connection settings for one 2.x endpoint.
#[derive(Debug, Clone, Default)]
pub struct Influx2Config {
    pub url: String,
    pub token: String,
    pub org: String,
    /// Optional fixed bucket; empty means "discover all buckets".
    pub bucket: String,
}

/// Shared HTTP plumbing for the source and target roles.
struct Influx2Handle {
    config: Influx2Config,
    client: RwLock<Option<reqwest::Client>>,
}

impl Influx2Handle {
    fn new(config: Influx2Config) -> Self {
        Self {
            config,
            client: RwLock::new(None),
        }
    }

    async fn connect(&self) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SyncError::connection(&self.config.url, e))?;

        client
            .get(format!("{}/ping", self.config.url))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::connection(&self.config.url, e))?;

        *self.client.write().await = Some(client);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.client.write().await = None;
        Ok(())
    }

    async fn client(&self) -> Result<reqwest::Client> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| SyncError::connection(&self.config.url, "not connected"))
    }

    /// Run a Flux script and return the parsed annotated-CSV records.
    async fn query_flux(&self, scope: &str, flux: &str) -> Result<Vec<CsvRecord>> {
        let client = self.client().await?;
        debug!(scope, flux, "flux query");

        let response = client
            .post(format!("{}/api/v2/query", self.config.url))
            .query(&[("org", self.config.org.as_str())])
            .header("Authorization", format!("Token {}", self.config.token))
            .header("Accept", "application/csv")
            .json(&serde_json::json!({
                "query": flux,
                "dialect": { "header": true, "annotations": ["datatype"] }
            }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::query(scope, e))?;

        let body = response
            .text()
            .await
            .map_err(|e| SyncError::query(scope, e))?;
        Ok(parse_annotated_csv(&body))
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct BucketList {
            #[serde(default)]
            buckets: Vec<Bucket>,
        }
        #[derive(Deserialize)]
        struct Bucket {
            name: String,
        }

        let client = self.client().await?;
        let list: BucketList = client
            .get(format!("{}/api/v2/buckets", self.config.url))
            .query(&[("org", self.config.org.as_str())])
            .header("Authorization", format!("Token {}", self.config.token))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::query(&self.config.url, e))?
            .json()
            .await
            .map_err(|e| SyncError::query(&self.config.url, e))?;

        Ok(list.buckets.into_iter().map(|b| b.name).collect())
    }

    async fn write(&self, bucket: &str, body: String) -> Result<()> {
        let client = self.client().await?;

        client
            .post(format!("{}/api/v2/write", self.config.url))
            .query(&[
                ("org", self.config.org.as_str()),
                ("bucket", bucket),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.config.token))
            .body(body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map(|_| ())
            .map_err(|e| SyncError::write(bucket, e))
    }
}

/// InfluxDB 2.x read side.
pub struct Influx2Source {
    handle: Influx2Handle,
}

impl Influx2Source {
    pub fn new(config: Influx2Config) -> Self {
        Self {
            handle: Influx2Handle::new(config),
        }
    }
}

impl DataSource for Influx2Source {
    fn connect(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.handle.connect())
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.handle.close())
    }

    fn list_databases(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            if !self.handle.config.bucket.is_empty() {
                return Ok(vec![self.handle.config.bucket.clone()]);
            }
            self.handle.list_buckets().await
        })
    }

    fn list_measurements(&self, database: &str) -> BoxFuture<'_, Vec<String>> {
        let bucket = database.to_string();
        Box::pin(async move {
            let flux = format!(
                "import \"influxdata/influxdb/schema\"\nschema.measurements(bucket: \"{}\")",
                escape_flux_string(&bucket)
            );
            let records = self.handle.query_flux(&bucket, &flux).await?;
            Ok(distinct_values(&records))
        })
    }

    fn list_tag_keys(&self, database: &str, measurement: &str) -> BoxFuture<'_, HashSet<String>> {
        let bucket = database.to_string();
        let measurement = measurement.to_string();
        Box::pin(async move {
            let flux = format!(
                "import \"influxdata/influxdb/schema\"\nschema.tagKeys(bucket: \"{}\", predicate: (r) => r._measurement == \"{}\")",
                escape_flux_string(&bucket),
                escape_flux_string(&measurement)
            );
            let records = self.handle.query_flux(&bucket, &flux).await?;
            // schema.tagKeys also reports the system columns (_start, _stop,
            // _measurement, _field); those are never point tags.
            Ok(distinct_values(&records)
                .into_iter()
                .filter(|k| !k.starts_with('_'))
                .collect())
        })
    }

    fn query_points(
        &self,
        database: &str,
        measurement: &str,
        since_nanos: i64,
        limit: usize,
    ) -> BoxFuture<'_, QueryBatch> {
        let bucket = database.to_string();
        let measurement = measurement.to_string();
        Box::pin(async move {
            let since_filter = if since_nanos > 0 {
                format!(
                    "  |> filter(fn: (r) => r._time > time(v: \"{}\"))\n",
                    crate::watermark::format_nanos(since_nanos)
                )
            } else {
                String::new()
            };
            let flux = format!(
                "from(bucket: \"{}\")\n  |> range(start: -100y)\n  |> filter(fn: (r) => r._measurement == \"{}\")\n{}  |> group()\n  |> sort(columns: [\"_time\"])\n  |> limit(n: {})",
                escape_flux_string(&bucket),
                escape_flux_string(&measurement),
                since_filter,
                limit
            );

            let scope = format!("{bucket}/{measurement}");
            let records = self.handle.query_flux(&scope, &flux).await?;
            Ok(records_to_batch(&records, &measurement, since_nanos))
        })
    }
}

/// InfluxDB 2.x write side.
pub struct Influx2Target {
    handle: Influx2Handle,
}

impl Influx2Target {
    pub fn new(config: Influx2Config) -> Self {
        Self {
            handle: Influx2Handle::new(config),
        }
    }
}

impl DataTarget for Influx2Target {
    fn connect(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.handle.connect())
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.handle.close())
    }

    fn write_points(&self, destination: &str, points: &[DataPoint]) -> BoxFuture<'_, ()> {
        let destination = destination.to_string();
        let body = lineproto::encode(points);
        Box::pin(async move { self.handle.write(&destination, body).await })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Annotated CSV
// ═══════════════════════════════════════════════════════════════════════════════

/// One data row with its column names and `#datatype` annotations.
#[derive(Debug, Clone)]
struct CsvRecord {
    columns: Vec<String>,
    datatypes: Vec<String>,
    cells: Vec<String>,
}

impl CsvRecord {
    fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.cells.get(i))
            .map(String::as_str)
    }

    fn datatype(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.datatypes.get(i))
            .map(String::as_str)
    }
}

/// Parse an annotated-CSV response body into records.
///
/// Tables are separated by blank lines; each table carries a `#datatype`
/// annotation row followed by a header row. Other annotations are ignored.
fn parse_annotated_csv(body: &str) -> Vec<CsvRecord> {
    let mut records = Vec::new();
    let mut datatypes: Vec<String> = Vec::new();
    let mut columns: Vec<String> = Vec::new();

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            // table boundary
            datatypes.clear();
            columns.clear();
            continue;
        }

        let cells = split_csv_line(line);
        if let Some(first) = cells.first() {
            if first == "#datatype" {
                datatypes = cells;
                continue;
            }
            if first.starts_with('#') {
                continue;
            }
        }

        if columns.is_empty() {
            columns = cells;
            continue;
        }

        records.push(CsvRecord {
            columns: columns.clone(),
            datatypes: datatypes.clone(),
            cells,
        });
    }

    records
}

/// Split one CSV line, honoring double-quoted cells with `""` escapes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    cell.push('"');
                } else {
                    quoted = false;
                }
            }
            '"' => quoted = true,
            ',' if !quoted => {
                cells.push(std::mem::take(&mut cell));
            }
            _ => cell.push(c),
        }
    }
    cells.push(cell);
    cells
}

/// Distinct `_value` strings, for `schema.measurements` / `schema.tagKeys`.
fn distinct_values(records: &[CsvRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut values = Vec::new();
    for record in records {
        if let Some(v) = record.get("_value") {
            if !v.is_empty() && seen.insert(v.to_string()) {
                values.push(v.to_string());
            }
        }
    }
    values
}

/// Pivot field-per-row records back into points grouped by timestamp.
fn records_to_batch(records: &[CsvRecord], measurement: &str, since_nanos: i64) -> QueryBatch {
    // BTreeMap keeps points in ascending time order, matching the contract.
    let mut by_time: BTreeMap<i64, DataPoint> = BTreeMap::new();

    for record in records {
        let Some(nanos) = record
            .get("_time")
            .and_then(crate::watermark::parse_rfc3339_nanos)
        else {
            continue;
        };

        let point = by_time
            .entry(nanos)
            .or_insert_with(|| DataPoint::new(measurement, nanos));

        for (idx, column) in record.columns.iter().enumerate() {
            if column.is_empty() || column.starts_with('_') || column == "result" || column == "table"
            {
                continue;
            }
            if let Some(value) = record.cells.get(idx) {
                if !value.is_empty() {
                    point.tags.insert(column.clone(), value.clone());
                }
            }
        }

        if let (Some(field), Some(raw)) = (record.get("_field"), record.get("_value")) {
            if let Some(value) = typed_value(raw, record.datatype("_value")) {
                point.fields.insert(field.to_string(), value);
            }
        }
    }

    let mut batch = QueryBatch::empty(since_nanos);
    for (nanos, point) in by_time {
        if nanos > batch.max_timestamp_nanos {
            batch.max_timestamp_nanos = nanos;
        }
        batch.points.push(point);
    }
    batch
}

/// Apply the `#datatype` annotation to a raw cell.
fn typed_value(raw: &str, datatype: Option<&str>) -> Option<FieldValue> {
    match datatype {
        Some("double") => raw.parse::<f64>().ok().map(FieldValue::Float),
        Some("long") | Some("unsignedLong") => raw.parse::<i64>().ok().map(FieldValue::Integer),
        Some("boolean") => raw.parse::<bool>().ok().map(FieldValue::Boolean),
        // No annotation: fall back to best-effort typing.
        _ => {
            if raw.is_empty() {
                None
            } else if let Ok(i) = raw.parse::<i64>() {
                Some(FieldValue::Integer(i))
            } else if let Ok(f) = raw.parse::<f64>() {
                Some(FieldValue::Float(f))
            } else if let Ok(b) = raw.parse::<bool>() {
                Some(FieldValue::Boolean(b))
            } else {
                Some(FieldValue::Text(raw.to_string()))
            }
        }
    }
}

/// Escape a string literal for embedding in a Flux script.
fn escape_flux_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
