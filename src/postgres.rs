//! PostgreSQL statement backend built on tokio-postgres
//!
//! Prepared handles are `tokio_postgres::Statement`s. Dropping the last clone
//! of a statement queues a Close message on the connection, so releasing a
//! handle is just dropping it.
//!
//! Server errors are classified by SQLSTATE:
//! - `26000` (invalid statement name) and `0A000` "cached plan must not change
//!   result type" mean the handle went stale
//! - class `08` and `57P01`-`57P03` mean the connection is gone
//! - anything else is a database error
//!
//! Parameters bind only to matching parameter types. Result cells map to the
//! closest [`Value`]; dates, times, json, uuid and numeric come back as text,
//! and types with no mapping come back as their raw binary encoding.

use crate::backend::{ResultSet, StatementBackend, Value};
use crate::cache::CacheConfig;
use crate::connection::CachedConnection;
use crate::error::{DbError, DbErrorKind, Phase, Result, StatementError};
use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use tokio::task::JoinHandle;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls, Row, Statement};
use tracing::{debug, error, info};
use uuid::Uuid;

const STALE_PLAN_MESSAGE: &str = "cached plan must not change result type";

/// Connection settings for PostgreSQL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PgConfig {
    /// libpq-style connection string, e.g. `host=localhost dbname=steve`
    pub dsn: String,

    /// Statement cache settings for connections opened with this config
    pub cache: CacheConfig,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            dsn: "host=localhost user=postgres dbname=postgres".to_string(),
            cache: CacheConfig::default(),
        }
    }
}

impl PgConfig {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            ..Default::default()
        }
    }

    /// Replace the cache settings
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Read settings from `PGSTMT_DSN`, `PGSTMT_CACHE_ENABLED` and
    /// `PGSTMT_CACHE_CAPACITY`, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let cache_defaults = CacheConfig::default();

        Self {
            dsn: std::env::var("PGSTMT_DSN").unwrap_or(defaults.dsn),
            cache: CacheConfig {
                enabled: std::env::var("PGSTMT_CACHE_ENABLED")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(cache_defaults.enabled),
                capacity: std::env::var("PGSTMT_CACHE_CAPACITY")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(cache_defaults.capacity),
                ..cache_defaults
            },
        }
    }
}

/// Open a PostgreSQL connection wrapped in a statement cache per `config.cache`
pub async fn connect(config: &PgConfig) -> Result<CachedConnection<PgBackend>> {
    config.cache.validate()?;

    let backend = PgBackend::connect(&config.dsn)
        .await
        .map_err(|e| StatementError::ConnectionError {
            phase: Phase::Direct,
            message: e.message,
        })?;

    CachedConnection::new(backend, config.cache.clone())
}

/// One tokio-postgres client and the task driving its socket
pub struct PgBackend {
    client: Client,
    driver: JoinHandle<()>,
}

impl PgBackend {
    /// Connect without TLS. The client shuts the driver task down when dropped.
    pub async fn connect(dsn: &str) -> std::result::Result<Self, DbError> {
        info!("Connecting to PostgreSQL");

        let (client, connection) = tokio_postgres::connect(dsn, NoTls)
            .await
            .map_err(classify_error)?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        info!("Successfully connected to PostgreSQL");
        Ok(Self { client, driver })
    }

    /// Get a reference to the underlying tokio-postgres client
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn run(&self, statement: &Statement, params: &[Value]) -> std::result::Result<ResultSet, DbError> {
        let params = sql_params(params);

        if statement.columns().is_empty() {
            let affected = self
                .client
                .execute(statement, &params)
                .await
                .map_err(classify_error)?;
            return Ok(ResultSet::command(affected));
        }

        let rows = self
            .client
            .query(statement, &params)
            .await
            .map_err(classify_error)?;
        to_result_set(statement, &rows)
    }
}

#[async_trait]
impl StatementBackend for PgBackend {
    type Handle = Statement;

    async fn prepare(&mut self, sql: &str) -> std::result::Result<Statement, DbError> {
        self.client.prepare(sql).await.map_err(classify_error)
    }

    async fn bind_execute(
        &mut self,
        handle: &Statement,
        params: &[Value],
    ) -> std::result::Result<ResultSet, DbError> {
        self.run(handle, params).await
    }

    async fn release(&mut self, handle: Statement) -> std::result::Result<(), DbError> {
        if self.client.is_closed() {
            return Err(DbError::connection("connection closed before release"));
        }
        drop(handle);
        Ok(())
    }

    async fn execute_direct(&mut self, sql: &str, params: &[Value]) -> std::result::Result<ResultSet, DbError> {
        // The statement is closed on the server as soon as it goes out of scope
        let statement = self.client.prepare(sql).await.map_err(classify_error)?;
        self.run(&statement, params).await
    }

    async fn close(&mut self) -> std::result::Result<(), DbError> {
        debug!("Closing PostgreSQL connection");
        if self.driver.is_finished() {
            return Err(DbError::connection("connection already closed"));
        }
        Ok(())
    }
}

fn sql_params(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

/// Map a tokio-postgres error onto the backend taxonomy
pub fn classify_error(err: tokio_postgres::Error) -> DbError {
    if let Some(db) = err.as_db_error() {
        let code = db.code().code();
        let message = db.message().to_string();
        let kind = classify_sqlstate(code, &message);
        return DbError::new(kind, message).with_code(code);
    }

    if err.is_closed() || err.source().map_or(false, |s| s.is::<std::io::Error>()) {
        return DbError::connection(err.to_string());
    }

    // Client-side failures without a server response: parameter encoding or count
    DbError::bind(err.to_string())
}

/// Classify an SQLSTATE code and message
pub fn classify_sqlstate(code: &str, message: &str) -> DbErrorKind {
    match code {
        "26000" => DbErrorKind::StaleStatement,
        "0A000" if message.contains(STALE_PLAN_MESSAGE) => DbErrorKind::StaleStatement,
        "57P01" | "57P02" | "57P03" => DbErrorKind::Connection,
        c if c.starts_with("08") => DbErrorKind::Connection,
        _ => DbErrorKind::Database,
    }
}

fn to_result_set(statement: &Statement, rows: &[Row]) -> std::result::Result<ResultSet, DbError> {
    let columns: Vec<String> = statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut cells = Vec::with_capacity(columns.len());
        for (idx, column) in row.columns().iter().enumerate() {
            cells.push(cell(row, idx, column.type_())?);
        }
        out.push(cells);
    }

    Ok(ResultSet::with_rows(columns, out))
}

fn cell(row: &Row, idx: usize, ty: &Type) -> std::result::Result<Value, DbError> {
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx).map(Value::from)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)
            .map(|v| Value::from(v.map(i64::from)))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)
            .map(|v| Value::from(v.map(i64::from)))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx).map(Value::from)
    } else if *ty == Type::OID {
        row.try_get::<_, Option<u32>>(idx)
            .map(|v| Value::from(v.map(i64::from)))
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)
            .map(|v| Value::from(v.map(f64::from)))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx).map(Value::from)
    } else if *ty == Type::NUMERIC {
        row.try_get::<_, Option<Numeric>>(idx)
            .map(|v| Value::from(v.map(|n| n.0)))
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx)
            .map(|v| Value::from(v.map(|t| t.to_rfc3339())))
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx)
            .map(|v| Value::from(v.map(|t| t.to_string())))
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<NaiveDate>>(idx)
            .map(|v| Value::from(v.map(|d| d.to_string())))
    } else if *ty == Type::TIME {
        row.try_get::<_, Option<NaiveTime>>(idx)
            .map(|v| Value::from(v.map(|t| t.to_string())))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(idx)
            .map(|v| Value::from(v.map(|j| j.to_string())))
    } else if *ty == Type::UUID {
        row.try_get::<_, Option<Uuid>>(idx)
            .map(|v| Value::from(v.map(|u| u.to_string())))
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(idx).map(Value::from)
    } else if <String as FromSql>::accepts(ty) {
        row.try_get::<_, Option<String>>(idx).map(Value::from)
    } else {
        // Arrays, ranges, network types and the like come back undecoded
        row.try_get::<_, Option<Raw>>(idx)
            .map(|v| Value::from(v.map(|r| r.0)))
    };

    value.map_err(|e| DbError::database(format!("column {} ({}): {}", idx, ty, e)))
}

/// Binary wire value of any type, kept as-is
struct Raw(Vec<u8>);

impl<'a> FromSql<'a> for Raw {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(Raw(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// `numeric` rendered as its decimal text
struct Numeric(String);

impl<'a> FromSql<'a> for Numeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, Box<dyn StdError + Sync + Send>> {
        decode_numeric(raw).map(Numeric)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Decode the binary `numeric` format: a header of ndigits, weight, sign and
/// dscale, followed by base-10000 digit groups, most significant first.
/// The first group is worth `10000^weight`.
fn decode_numeric(raw: &[u8]) -> std::result::Result<String, Box<dyn StdError + Sync + Send>> {
    if raw.len() < 8 {
        return Err("numeric value too short".into());
    }
    let word = |at: usize| i16::from_be_bytes([raw[at], raw[at + 1]]);

    let ndigits = usize::try_from(word(0))?;
    let weight = i32::from(word(2));
    let sign = u16::from_be_bytes([raw[4], raw[5]]);
    let dscale = usize::from(u16::from_be_bytes([raw[6], raw[7]]));

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }
    if raw.len() < 8 + 2 * ndigits {
        return Err("numeric value truncated".into());
    }

    let digits: Vec<i16> = (0..ndigits).map(|i| word(8 + 2 * i)).collect();
    let group = |i: i32| {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&group(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", group(i)));
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", group(i)));
            i += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Ok(out)
}

fn wrong_type(value: &Value, ty: &Type) -> Box<dyn StdError + Sync + Send> {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::Text(_) => "text",
        Value::Bytes(_) => "bytes",
    };
    format!("cannot bind {} value to parameter of type {}", kind, ty).into()
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) if *ty == Type::BOOL => v.to_sql(ty, out),
            Value::Int(v) if *ty == Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
            Value::Int(v) if *ty == Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
            Value::Int(v) if *ty == Type::INT8 => v.to_sql(ty, out),
            Value::Int(v) if *ty == Type::FLOAT4 => (*v as f32).to_sql(ty, out),
            Value::Int(v) if *ty == Type::FLOAT8 => (*v as f64).to_sql(ty, out),
            Value::Float(v) if *ty == Type::FLOAT4 => (*v as f32).to_sql(ty, out),
            Value::Float(v) if *ty == Type::FLOAT8 => v.to_sql(ty, out),
            Value::Text(s) if <String as ToSql>::accepts(ty) => s.to_sql(ty, out),
            Value::Bytes(b) if *ty == Type::BYTEA => b.to_sql(ty, out),
            other => Err(wrong_type(other, ty)),
        }
    }

    // Checked per variant in to_sql
    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
