//! The capability set a statement cache needs from a database connection
//!
//! A [`StatementBackend`] is one live connection. It knows how to prepare SQL
//! text into an opaque handle, execute a handle with bound parameters, release
//! a handle, and run SQL directly without keeping anything around. It knows
//! nothing about caching.

use crate::error::DbError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A parameter or result cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// `bytea`, or the raw binary encoding of a type with no richer mapping
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytes(b) => {
                write!(f, "\\x")?;
                b.iter().try_for_each(|byte| write!(f, "{:02x}", byte))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Rows returned by a query, or the affected-row count of a command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Rows affected by a command; for queries, the number of rows returned
    pub rows_affected: u64,
}

impl ResultSet {
    /// Result of a query returning rows
    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let rows_affected = rows.len() as u64;
        Self {
            columns,
            rows,
            rows_affected,
        }
    }

    /// Result of a command with no result columns
    pub fn command(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell lookup by row index and column name
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}

/// One live database connection, as seen by the statement cache.
///
/// Implementations must not be shared between caches: prepared handles are
/// scoped to the server session that produced them.
#[async_trait]
pub trait StatementBackend: Send {
    /// Opaque server-side prepared statement reference
    type Handle: Clone + Send + Sync + fmt::Debug;

    /// Parse and plan `sql`, returning a reusable handle
    async fn prepare(&mut self, sql: &str) -> Result<Self::Handle, DbError>;

    /// Bind `params` to a prepared handle and run it
    async fn bind_execute(
        &mut self,
        handle: &Self::Handle,
        params: &[Value],
    ) -> Result<ResultSet, DbError>;

    /// Deallocate a prepared handle on the server. Best-effort.
    async fn release(&mut self, handle: Self::Handle) -> Result<(), DbError>;

    /// One-shot parse-bind-execute that leaves nothing prepared
    async fn execute_direct(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet, DbError>;

    /// Shut the connection down
    async fn close(&mut self) -> Result<(), DbError> {
        Ok(())
    }
}
