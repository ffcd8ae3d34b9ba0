//! Embedded DuckDB engine.
//!
//! Altertable speaks the DuckDB dialect, so an embedded DuckDB database can
//! stand in for the remote endpoint when developing models offline. All
//! sessions of one connector share a single database.

use arrow_array::types::IntervalMonthDayNano;
use arrow_array::{
    Date32Array, IntervalMonthDayNanoArray, Time32MillisecondArray, Time32SecondArray,
    Time64MicrosecondArray, Time64NanosecondArray, TimestampMicrosecondArray,
    TimestampMillisecondArray, TimestampNanosecondArray, TimestampSecondArray,
};
use async_trait::async_trait;
use base64::Engine;
use duckdb::types::{TimeUnit, Value};
use duckdb::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::credentials::AltertableCredentials;
use crate::error::AdapterError;
use crate::session::{Connector, Session};
use crate::table::{display_first, Table, TableColumn};

/// Opens sessions on an embedded DuckDB database.
pub struct DuckdbConnector {
    root: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl DuckdbConnector {
    /// Create a connector backed by an in-memory database.
    pub fn in_memory() -> Result<Self, AdapterError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AdapterError::Database(format!("Failed to create in-memory DuckDB: {}", e)))?;
        Ok(Self {
            root: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Create a connector backed by a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AdapterError> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| AdapterError::Database(format!("Failed to open database: {}", e)))?;
        Ok(Self {
            root: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open from a CLI-style location, where `:memory:` means in-memory.
    pub fn from_location(location: &str) -> Result<Self, AdapterError> {
        if location.is_empty() || location == ":memory:" {
            Self::in_memory()
        } else {
            Self::open(location)
        }
    }

    /// Catalog name DuckDB assigns to the database.
    pub fn catalog_name(&self) -> String {
        self.path
            .as_ref()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "memory".to_string())
    }
}

#[async_trait]
impl Connector for DuckdbConnector {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    async fn connect(
        &self,
        credentials: &AltertableCredentials,
    ) -> Result<Box<dyn Session>, AdapterError> {
        let conn = {
            let root = self.root.lock().map_err(|e| {
                AdapterError::Database(format!("Failed to acquire connection lock: {}", e))
            })?;
            root.try_clone()
                .map_err(|e| AdapterError::Database(format!("Failed to create connection: {}", e)))?
        };

        tracing::debug!(
            catalog = %self.catalog_name(),
            schema = %credentials.schema,
            "Opened embedded DuckDB session"
        );

        Ok(Box::new(DuckdbSession {
            conn: Arc::new(Mutex::new(conn)),
        }))
    }
}

/// A session on the embedded engine.
pub struct DuckdbSession {
    conn: Arc<Mutex<Connection>>,
}

impl DuckdbSession {
    async fn run<T, F>(&self, f: F) -> Result<T, AdapterError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, AdapterError> + Send + 'static,
    {
        let conn = self.conn.clone();

        // DuckDB is sync
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|e| {
                AdapterError::Database(format!("Failed to acquire connection lock: {}", e))
            })?;
            f(&guard)
        })
        .await
        .map_err(|e| AdapterError::Database(format!("Task join error: {}", e)))?
    }
}

#[async_trait]
impl Session for DuckdbSession {
    fn engine(&self) -> &'static str {
        "duckdb"
    }

    async fn query(&mut self, sql: &str) -> Result<Table, AdapterError> {
        let sql = sql.to_string();
        self.run(move |conn| query_table(conn, &sql)).await
    }

    async fn execute(&mut self, sql: &str) -> Result<Option<i64>, AdapterError> {
        let sql = sql.to_string();
        self.run(move |conn| {
            let affected = conn
                .execute(&sql, [])
                .map_err(|e| AdapterError::Database(format!("Execute failed: {}", e)))?;
            Ok(Some(affected as i64))
        })
        .await
    }
}

/// Run a statement and collect whatever rows it produces.
///
/// Statements without a result set yield zero rows.
fn query_table(conn: &Connection, sql: &str) -> Result<Table, AdapterError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| AdapterError::Database(format!("Failed to prepare query: {}", e)))?;

    let mut rows = Vec::new();
    {
        let mut result = stmt
            .query([])
            .map_err(|e| AdapterError::Database(format!("Query failed: {}", e)))?;

        while let Some(row) = result
            .next()
            .map_err(|e| AdapterError::Database(format!("Failed to fetch row: {}", e)))?
        {
            let column_count = row.as_ref().column_count();
            let mut values = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                let value: Value = row.get(idx).map_err(|e| {
                    AdapterError::Database(format!("Failed to read column {}: {}", idx, e))
                })?;
                values.push(duckdb_value_to_json(value)?);
            }
            rows.push(values);
        }
    }

    // Column info is only available once the statement has run
    let columns: Vec<TableColumn> = (0..stmt.column_count())
        .map(|i| TableColumn::new(stmt.column_name(i).map_or("", |v| v).to_string(), None))
        .collect();

    Ok(Table::new(columns, rows))
}

/// Convert a DuckDB value to JSON.
///
/// Temporal and interval values use the same Arrow display formatting as
/// Flight SQL results.
#[allow(unreachable_patterns)]
fn duckdb_value_to_json(value: Value) -> Result<serde_json::Value, AdapterError> {
    use serde_json::json;

    let converted = match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => json!(b),
        Value::TinyInt(n) => json!(n),
        Value::SmallInt(n) => json!(n),
        Value::Int(n) => json!(n),
        Value::BigInt(n) => json!(n),
        Value::UTinyInt(n) => json!(n),
        Value::USmallInt(n) => json!(n),
        Value::UInt(n) => json!(n),
        Value::UBigInt(n) => json!(n),
        Value::HugeInt(n) => json!(n.to_string()),
        Value::Float(f) => float_json(f64::from(f)),
        Value::Double(f) => float_json(f),
        Value::Decimal(d) => json!(d.to_string()),
        Value::Text(s) | Value::Enum(s) => json!(s),
        Value::Blob(b) => json!(base64::engine::general_purpose::STANDARD.encode(b)),
        Value::Date32(days) => json!(display_first(&Date32Array::from(vec![days]))?),
        Value::Timestamp(unit, t) => json!(display_timestamp(unit, t)?),
        Value::Time64(unit, t) => json!(display_time(unit, t)?),
        Value::Interval { months, days, nanos } => {
            let interval = IntervalMonthDayNano::new(months, days, nanos);
            json!(display_first(&IntervalMonthDayNanoArray::from(vec![interval]))?)
        }
        Value::List(items) | Value::Array(items) => serde_json::Value::Array(
            items
                .into_iter()
                .map(duckdb_value_to_json)
                .collect::<Result<_, _>>()?,
        ),
        Value::Struct(fields) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in fields.iter() {
                obj.insert(k.clone(), duckdb_value_to_json(v.clone())?);
            }
            serde_json::Value::Object(obj)
        }
        Value::Map(entries) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in entries.iter() {
                let key = match duckdb_value_to_json(k.clone())? {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                obj.insert(key, duckdb_value_to_json(v.clone())?);
            }
            serde_json::Value::Object(obj)
        }
        Value::Union(inner) => duckdb_value_to_json(*inner)?,
        other => {
            return Err(AdapterError::Database(format!(
                "Unsupported DuckDB value: {:?}",
                other
            )))
        }
    };
    Ok(converted)
}

fn float_json(f: f64) -> serde_json::Value {
    serde_json::Number::from_f64(f)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

fn display_timestamp(unit: TimeUnit, value: i64) -> Result<String, AdapterError> {
    match unit {
        TimeUnit::Second => display_first(&TimestampSecondArray::from(vec![value])),
        TimeUnit::Millisecond => display_first(&TimestampMillisecondArray::from(vec![value])),
        TimeUnit::Microsecond => display_first(&TimestampMicrosecondArray::from(vec![value])),
        TimeUnit::Nanosecond => display_first(&TimestampNanosecondArray::from(vec![value])),
    }
}

fn display_time(unit: TimeUnit, value: i64) -> Result<String, AdapterError> {
    let out_of_range = || AdapterError::Database(format!("Time value {} out of range", value));
    match unit {
        TimeUnit::Second => {
            let v = i32::try_from(value).map_err(|_| out_of_range())?;
            display_first(&Time32SecondArray::from(vec![v]))
        }
        TimeUnit::Millisecond => {
            let v = i32::try_from(value).map_err(|_| out_of_range())?;
            display_first(&Time32MillisecondArray::from(vec![v]))
        }
        TimeUnit::Microsecond => display_first(&Time64MicrosecondArray::from(vec![value])),
        TimeUnit::Nanosecond => display_first(&Time64NanosecondArray::from(vec![value])),
    }
}
