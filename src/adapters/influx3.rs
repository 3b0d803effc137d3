//! InfluxDB 3.x adapter: SQL, v1-compat, and v2-compat modes.
//!
//! The mode is a [`Influx3Config`] variant fixed at construction time:
//!
//! - `V1Compat` speaks the InfluxQL endpoints (`/query`, `/write`) and
//!   shares the 1.x wire handling.
//! - `V2Compat` and `Native` speak SQL over `POST /v1/sql`, discovering
//!   measurements and tag columns through `information_schema` (tags are
//!   dictionary-encoded columns in 3.x storage).
//!
//! All modes write line protocol; only the endpoint and auth differ.

use crate::adapters::influx1::{collect_series_points, json_to_field, quote_ident, QueryResponse};
use crate::adapters::lineproto;
use crate::backend::{BoxFuture, DataSource, DataTarget};
use crate::config::Influx3Config;
use crate::error::{Result, SyncError};
use crate::point::{DataPoint, QueryBatch};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Shared HTTP plumbing for the source and target roles.
struct Influx3Handle {
    config: Influx3Config,
    client: RwLock<Option<reqwest::Client>>,
}

impl Influx3Handle {
    fn new(config: Influx3Config) -> Self {
        Self {
            config,
            client: RwLock::new(None),
        }
    }

    fn url(&self) -> &str {
        match &self.config {
            Influx3Config::V1Compat { url, .. }
            | Influx3Config::V2Compat { url, .. }
            | Influx3Config::Native { url, .. } => url,
        }
    }

    fn database(&self) -> &str {
        match &self.config {
            Influx3Config::V1Compat { database, .. }
            | Influx3Config::V2Compat { database, .. }
            | Influx3Config::Native { database, .. } => database,
        }
    }

    /// Apply the mode's auth scheme to a request.
    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config {
            Influx3Config::V1Compat { user, pass, .. } => {
                if user.is_empty() {
                    req
                } else {
                    req.basic_auth(user, Some(pass))
                }
            }
            Influx3Config::V2Compat { token, .. } | Influx3Config::Native { token, .. } => {
                if token.is_empty() {
                    req
                } else {
                    req.header("Authorization", format!("Bearer {token}"))
                }
            }
        }
    }

    async fn connect(&self) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SyncError::connection(self.url(), e))?;

        let req = self.authorize(client.get(format!("{}/ping", self.url())));
        req.send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::connection(self.url(), e))?;

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
            .ok_or_else(|| SyncError::connection(self.url(), "not connected"))
    }

    /// Run one InfluxQL statement (v1-compat mode only).
    async fn query_influxql(&self, database: &str, statement: &str) -> Result<QueryResponse> {
        let client = self.client().await?;

        let mut params = vec![("q", statement.to_string()), ("epoch", "ns".to_string())];
        if !database.is_empty() {
            params.push(("db", database.to_string()));
        }

        debug!(database, statement, "influxql query (v1 compat)");
        let response = self
            .authorize(client.get(format!("{}/query", self.url())).query(&params))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::query(database, e))?;

        let decoded: QueryResponse = response
            .json()
            .await
            .map_err(|e| SyncError::query(database, e))?;
        if let Some(message) = decoded.error_message() {
            return Err(SyncError::query(database, message));
        }
        Ok(decoded)
    }

    /// Run one SQL statement and return its rows (v2-compat/native modes).
    async fn query_sql(&self, scope: &str, sql: &str) -> Result<Vec<serde_json::Value>> {
        let client = self.client().await?;

        let mut body = serde_json::json!({
            "query": sql,
            "database": self.database(),
            "format": "json",
        });
        if let Influx3Config::Native {
            namespace: Some(ns),
            ..
        } = &self.config
        {
            body["namespace"] = serde_json::Value::String(ns.clone());
        }

        debug!(scope, sql, "sql query");
        let response = self
            .authorize(client.post(format!("{}/v1/sql", self.url())).json(&body))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::query(scope, e))?;

        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| SyncError::query(scope, e))?;
        Ok(rows)
    }

    async fn write(&self, destination: &str, body: String) -> Result<()> {
        let client = self.client().await?;

        let req = match &self.config {
            Influx3Config::V1Compat { .. } => client
                .post(format!("{}/write", self.url()))
                .query(&[("db", destination), ("precision", "ns")]),
            Influx3Config::V2Compat { .. } => client
                .post(format!("{}/api/v2/write", self.url()))
                .query(&[("bucket", destination), ("precision", "ns")]),
            Influx3Config::Native { namespace, .. } => {
                let mut params = vec![
                    ("database".to_string(), destination.to_string()),
                    ("precision".to_string(), "ns".to_string()),
                ];
                if let Some(ns) = namespace {
                    params.push(("namespace".to_string(), ns.clone()));
                }
                client
                    .post(format!("{}/v1/write", self.url()))
                    .query(&params)
            }
        };

        self.authorize(req.body(body))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map(|_| ())
            .map_err(|e| SyncError::write(destination, e))
    }
}

/// InfluxDB 3.x read side.
pub struct Influx3Source {
    handle: Influx3Handle,
    tag_keys: RwLock<HashMap<(String, String), HashSet<String>>>,
}

impl Influx3Source {
    pub fn new(config: Influx3Config) -> Self {
        Self {
            handle: Influx3Handle::new(config),
            tag_keys: RwLock::new(HashMap::new()),
        }
    }

    async fn tag_keys_cached(&self, database: &str, measurement: &str) -> Result<HashSet<String>> {
        let key = (database.to_string(), measurement.to_string());
        if let Some(keys) = self.tag_keys.read().await.get(&key) {
            return Ok(keys.clone());
        }

        let keys: HashSet<String> = match &self.handle.config {
            Influx3Config::V1Compat { .. } => {
                let statement = format!("SHOW TAG KEYS FROM {}", quote_ident(measurement));
                self.handle
                    .query_influxql(database, &statement)
                    .await?
                    .first_column_strings()
                    .into_iter()
                    .collect()
            }
            // Tags are dictionary-encoded columns in 3.x storage.
            _ => {
                let sql = format!(
                    "SELECT column_name FROM information_schema.columns WHERE table_name = '{}' AND data_type LIKE 'Dictionary%'",
                    escape_sql_string(measurement)
                );
                let scope = format!("{database}/{measurement}");
                self.handle
                    .query_sql(&scope, &sql)
                    .await?
                    .iter()
                    .filter_map(|row| row.get("column_name"))
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            }
        };

        self.tag_keys.write().await.insert(key, keys.clone());
        Ok(keys)
    }
}

impl DataSource for Influx3Source {
    fn connect(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.handle.connect())
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.handle.close())
    }

    fn list_databases(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            match &self.handle.config {
                Influx3Config::V1Compat { .. } => {
                    let response = self.handle.query_influxql("", "SHOW DATABASES").await?;
                    Ok(response.first_column_strings())
                }
                // SQL modes are scoped to their configured database.
                _ => Ok(vec![self.handle.database().to_string()]),
            }
        })
    }

    fn list_measurements(&self, database: &str) -> BoxFuture<'_, Vec<String>> {
        let database = database.to_string();
        Box::pin(async move {
            match &self.handle.config {
                Influx3Config::V1Compat { .. } => {
                    let response = self
                        .handle
                        .query_influxql(&database, "SHOW MEASUREMENTS")
                        .await?;
                    Ok(response.first_column_strings())
                }
                _ => {
                    let sql =
                        "SELECT table_name FROM information_schema.tables WHERE table_schema = 'iox'";
                    let rows = self.handle.query_sql(&database, sql).await?;
                    Ok(rows
                        .iter()
                        .filter_map(|row| row.get("table_name"))
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect())
                }
            }
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

            match &self.handle.config {
                Influx3Config::V1Compat { .. } => {
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
                    let response = self.handle.query_influxql(&database, &statement).await?;

                    let mut batch = QueryBatch::empty(since_nanos);
                    for result in &response.results {
                        for series in &result.series {
                            collect_series_points(series, &tag_keys, &mut batch);
                        }
                    }
                    Ok(batch)
                }
                _ => {
                    let sql = if since_nanos == 0 {
                        format!(
                            "SELECT * FROM {} ORDER BY time LIMIT {limit}",
                            quote_ident(&measurement)
                        )
                    } else {
                        format!(
                            "SELECT * FROM {} WHERE time > '{}' ORDER BY time LIMIT {limit}",
                            quote_ident(&measurement),
                            crate::watermark::format_nanos(since_nanos)
                        )
                    };
                    let scope = format!("{database}/{measurement}");
                    let rows = self.handle.query_sql(&scope, &sql).await?;
                    Ok(sql_rows_to_batch(&rows, &tag_keys, &measurement, since_nanos))
                }
            }
        })
    }
}

/// InfluxDB 3.x write side.
pub struct Influx3Target {
    handle: Influx3Handle,
}

impl Influx3Target {
    pub fn new(config: Influx3Config) -> Self {
        Self {
            handle: Influx3Handle::new(config),
        }
    }
}

impl DataTarget for Influx3Target {
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

/// Convert SQL JSON rows (one object per row) into points.
fn sql_rows_to_batch(
    rows: &[serde_json::Value],
    tag_keys: &HashSet<String>,
    measurement: &str,
    since_nanos: i64,
) -> QueryBatch {
    let mut batch = QueryBatch::empty(since_nanos);

    for row in rows {
        let Some(object) = row.as_object() else {
            continue;
        };
        let Some(timestamp_nanos) = object.get("time").and_then(sql_time_nanos) else {
            continue;
        };

        let mut point = DataPoint::new(measurement, timestamp_nanos);
        for (column, value) in object {
            if column == "time" {
                continue;
            }
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

    batch.points.sort_by_key(|p| p.timestamp_nanos);
    batch
}

/// SQL rows carry time either as RFC3339 text or as integer nanoseconds.
fn sql_time_nanos(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::String(s) => crate::watermark::parse_rfc3339_nanos(s),
        serde_json::Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

/// Escape a string literal for embedding in SQL.
fn escape_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}
