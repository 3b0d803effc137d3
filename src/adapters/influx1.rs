// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! InfluxDB 1.x adapter: InfluxQL over HTTP.
//!
//! Reads go through `GET /query` (`SHOW DATABASES`, `SHOW MEASUREMENTS`,
//! `SHOW TAG KEYS`, paged `SELECT`s with `epoch=ns`); writes ship line
//! protocol to `POST /write`. The 1.x result format does not distinguish
//! tag columns from field columns, so the source keeps a per-measurement
//! tag-key cache and splits rows with it.

use crate::adapters::lineproto;
use crate::backend::{BoxFuture, DataSource, DataTarget};
use crate::error::{Result, SyncError};
use crate::point::{DataPoint, FieldValue, QueryBatch};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Connection settings for one 1.x endpoint.
#[derive(Debug, Clone, Default)]
pub struct Influx1Config {
    pub url: String,
    pub user: String,
    pub pass: String,
}

/// Shared HTTP plumbing for the source and target roles.
struct Influx1Handle {
    config: Influx1Config,
    client: RwLock<Option<reqwest::Client>>,
}

impl Influx1Handle {
    fn new(config: Influx1Config) -> Self {
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

        // Ping before accepting the handle so auth/network problems surface
        // as connection errors, not as the first query's failure.
        let mut req = client.get(format!("{}/ping", self.config.url));
        if !self.config.user.is_empty() {
            req = req.basic_auth(&self.config.user, Some(&self.config.pass));
        }
        req.send()
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

    /// Run one InfluxQL statement and return the decoded response.
    async fn query(&self, database: &str, statement: &str) -> Result<QueryResponse> {
        let scope = if database.is_empty() {
            self.config.url.clone()
        } else {
            database.to_string()
        };
        let client = self.client().await?;

        let mut params = vec![("q", statement.to_string()), ("epoch", "ns".to_string())];
        if !database.is_empty() {
            params.push(("db", database.to_string()));
        }

        let mut req = client
            .get(format!("{}/query", self.config.url))
            .query(&params);
        if !self.config.user.is_empty() {
            req = req.basic_auth(&self.config.user, Some(&self.config.pass));
        }

        debug!(database, statement, "influxql query");
        let response = req
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::query(&scope, e))?;

        let decoded: QueryResponse = response
            .json()
            .await
            .map_err(|e| SyncError::query(&scope, e))?;

        if let Some(message) = decoded.error_message() {
            return Err(SyncError::query(&scope, message));
        }
        Ok(decoded)
    }

    async fn write(&self, destination: &str, body: String) -> Result<()> {
        let client = self.client().await?;

        let mut req = client
            .post(format!("{}/write", self.config.url))
            .query(&[("db", destination), ("precision", "ns")])
            .body(body);
        if !self.config.user.is_empty() {
            req = req.basic_auth(&self.config.user, Some(&self.config.pass));
        }

        req.send()
            .await
            .and_then(|r| r.error_for_status())
            .map(|_| ())
            .map_err(|e| SyncError::write(destination, e))
    }
}

/// InfluxDB 1.x read side.
pub struct Influx1Source {
    handle: Influx1Handle,
    /// Tag keys per (database, measurement); the split is stable for the
    /// lifetime of a run, so one lookup per measurement is enough.
    tag_keys: RwLock<HashMap<(String, String), HashSet<String>>>,
}

impl Influx1Source {
    pub fn new(config: Influx1Config) -> Self {
        Self {
            handle: Influx1Handle::new(config),
            tag_keys: RwLock::new(HashMap::new()),
        }
    }

    async fn tag_keys_cached(&self, database: &str, measurement: &str) -> Result<HashSet<String>> {
        let key = (database.to_string(), measurement.to_string());
        if let Some(keys) = self.tag_keys.read().await.get(&key) {
            return Ok(keys.clone());
        }

        let statement = format!("SHOW TAG KEYS FROM {}", quote_ident(measurement));
        let response = self.handle.query(database, &statement).await?;
        let keys: HashSet<String> = response.first_column_strings().into_iter().collect();

        self.tag_keys.write().await.insert(key, keys.clone());
        Ok(keys)
    }
}

impl DataSource for Influx1Source {
    fn connect(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.handle.connect())
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.handle.close())
    }

    fn list_databases(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            let response = self.handle.query("", "SHOW DATABASES").await?;
            Ok(response.first_column_strings())
        })
    }

    fn list_measurements(&self, database: &str) -> BoxFuture<'_, Vec<String>> {
        let database = database.to_string();
        Box::pin(async move {
            let response = self.handle.query(&database, "SHOW MEASUREMENTS").await?;
            Ok(response.first_column_strings())
        })
    }

    fn list_tag_keys(&self, database: &str, measurement: &str) -> BoxFuture<'_, HashSet<String>> {
        let database = database.to_string();
        let measurement = measurement.to_string();
        Box::pin(async move { self.tag_keys_cached(&database, &measurement).await })
    }

    fn query_points(
        &self,
        database: &str,
        measurement: &str,
        since_nanos: i64,
        limit: usize,
    ) -> BoxFuture<'_, QueryBatch> {
        let database = database.to_string();
        let measurement = measurement.to_string();
        Box::pin(async move {
            let tag_keys = self.tag_keys_cached(&database, &measurement).await?;

            let statement = if since_nanos == 0 {
                format!(
                    "SELECT * FROM {} ORDER BY time ASC LIMIT {limit}",
                    quote_ident(&measurement)
                )
            } else {
                format!(
                    "SELECT * FROM {} WHERE time > {since_nanos} ORDER BY time ASC LIMIT {limit}",
                    quote_ident(&measurement)
                )
            };

            let response = self.handle.query(&database, &statement).await?;

            let mut batch = QueryBatch::empty(since_nanos);
            for result in &response.results {
                for series in &result.series {
                    collect_series_points(series, &tag_keys, &mut batch);
                }
            }
            Ok(batch)
        })
    }
}

/// InfluxDB 1.x write side.
pub struct Influx1Target {
    handle: Influx1Handle,
}

impl Influx1Target {
    pub fn new(config: Influx1Config) -> Self {
        Self {
            handle: Influx1Handle::new(config),
        }
    }
}

impl DataTarget for Influx1Target {
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
// Wire format
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub(crate) struct QueryResponse {
    #[serde(default)]
    pub(crate) results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatementResult {
    #[serde(default)]
    pub(crate) series: Vec<Series>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Series {
    #[serde(default)]
    name: String,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

impl QueryResponse {
    pub(crate) fn error_message(&self) -> Option<String> {
        self.error
            .clone()
            .or_else(|| self.results.iter().find_map(|r| r.error.clone()))
    }

    /// Flatten the first column of every row, the shape of all SHOW
    /// statements.
    pub(crate) fn first_column_strings(&self) -> Vec<String> {
        let mut names = Vec::new();
        for result in &self.results {
            for series in &result.series {
                for row in &series.values {
                    if let Some(serde_json::Value::String(name)) = row.first() {
                        names.push(name.clone());
                    }
                }
            }
        }
        names
    }
}

/// Convert one SELECT series into points, splitting columns by the tag-key
/// set and tracking the maximum timestamp.
pub(crate) fn collect_series_points(
    series: &Series,
    tag_keys: &HashSet<String>,
    batch: &mut QueryBatch,
) {
    let Some(time_idx) = series.columns.iter().position(|c| c == "time") else {
        warn!(series = %series.name, "series has no time column, skipping");
        return;
    };

    for row in &series.values {
        let Some(timestamp_nanos) = row.get(time_idx).and_then(parse_time_nanos) else {
            warn!(series = %series.name, "unparseable time value, skipping point");
            continue;
        };

        let mut point = DataPoint::new(series.name.clone(), timestamp_nanos);
        for (idx, column) in series.columns.iter().enumerate() {
            if idx == time_idx {
                continue;
            }
            let Some(value) = row.get(idx) else { continue };
            if tag_keys.contains(column) {
                if let serde_json::Value::String(s) = value {
                    point.tags.insert(column.clone(), s.clone());
                }
            } else if let Some(field) = json_to_field(value) {
                point.fields.insert(column.clone(), field);
            }
        }

        if timestamp_nanos > batch.max_timestamp_nanos {
            batch.max_timestamp_nanos = timestamp_nanos;
        }
        batch.points.push(point);
    }
}

/// `epoch=ns` responses carry integer nanoseconds, but be liberal and accept
/// RFC3339 strings too.
fn parse_time_nanos(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => crate::watermark::parse_rfc3339_nanos(s),
        _ => None,
    }
}

/// Map a JSON cell to a field value; nulls and empty strings are dropped.
pub(crate) fn json_to_field(value: &serde_json::Value) -> Option<FieldValue> {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(FieldValue::Integer(i))
            } else {
                n.as_f64().map(FieldValue::Float)
            }
        }
        serde_json::Value::Bool(b) => Some(FieldValue::Boolean(*b)),
        serde_json::Value::String(s) if !s.is_empty() => Some(FieldValue::Text(s.clone())),
        _ => None,
    }
}

/// Double-quote an identifier for InfluxQL and SQL, escaping embedded
/// quotes.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn series(value: serde_json::Value) -> Series {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("cpu"), "\"cpu\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\\\"ird\"");
    }

    #[test]
    fn test_first_column_strings() {
        let response: QueryResponse = serde_json::from_value(json!({
            "results": [{
                "series": [{
                    "name": "databases",
                    "columns": ["name"],
                    "values": [["db1"], ["db2"], ["_internal"]]
                }]
            }]
        }))
        .unwrap();
        assert_eq!(
            response.first_column_strings(),
            vec!["db1", "db2", "_internal"]
        );
    }

    #[test]
    fn test_error_message_from_statement() {
        let response: QueryResponse = serde_json::from_value(json!({
            "results": [{"error": "database not found"}]
        }))
        .unwrap();
        assert_eq!(
            response.error_message().as_deref(),
            Some("database not found")
        );
    }

    #[test]
    fn test_collect_series_points_splits_tags_and_fields() {
        let s = series(json!({
            "name": "cpu",
            "columns": ["time", "host", "usage", "cores", "online", "note"],
            "values": [
                [1000, "db-01", 0.5, 8, true, "ok"],
                [2000, "db-02", 0.7, 16, false, ""]
            ]
        }));
        let tag_keys: HashSet<String> = ["host".to_string()].into_iter().collect();

        let mut batch = QueryBatch::empty(0);
        collect_series_points(&s, &tag_keys, &mut batch);

        assert_eq!(batch.points.len(), 2);
        assert_eq!(batch.max_timestamp_nanos, 2000);

        let p = &batch.points[0];
        assert_eq!(p.measurement, "cpu");
        assert_eq!(p.tags["host"], "db-01");
        assert_eq!(p.fields["usage"], FieldValue::Float(0.5));
        assert_eq!(p.fields["cores"], FieldValue::Integer(8));
        assert_eq!(p.fields["online"], FieldValue::Boolean(true));
        assert_eq!(p.fields["note"], FieldValue::Text("ok".to_string()));

        // empty string fields are dropped
        assert!(!batch.points[1].fields.contains_key("note"));
    }

    #[test]
    fn test_collect_series_points_skips_bad_time() {
        let s = series(json!({
            "name": "cpu",
            "columns": ["time", "usage"],
            "values": [[{"bogus": true}, 0.5], [3000, 0.6]]
        }));

        let mut batch = QueryBatch::empty(0);
        collect_series_points(&s, &HashSet::new(), &mut batch);

        assert_eq!(batch.points.len(), 1);
        assert_eq!(batch.points[0].timestamp_nanos, 3000);
    }

    #[test]
    fn test_parse_time_accepts_rfc3339_string() {
        let nanos = parse_time_nanos(&json!("2024-06-01T12:00:00.000000001Z")).unwrap();
        assert_eq!(nanos % 10, 1);
        assert!(parse_time_nanos(&json!("bogus")).is_none());
    }

    #[test]
    fn test_json_to_field_typing() {
        assert_eq!(json_to_field(&json!(1)), Some(FieldValue::Integer(1)));
        assert_eq!(json_to_field(&json!(1.5)), Some(FieldValue::Float(1.5)));
        assert_eq!(json_to_field(&json!(true)), Some(FieldValue::Boolean(true)));
        assert_eq!(
            json_to_field(&json!("x")),
            Some(FieldValue::Text("x".to_string()))
        );
        assert_eq!(json_to_field(&json!(null)), None);
        assert_eq!(json_to_field(&json!("")), None);
    }
}
