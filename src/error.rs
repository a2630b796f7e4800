//! Error types for statement execution
//!
//! Two layers live here: [`DbError`] is what a statement backend reports for a
//! single round trip, and [`StatementError`] is what callers of a
//! [`CachedConnection`](crate::connection::CachedConnection) see. Every
//! caller-facing error names the phase that produced it.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The round trip that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Preparing SQL text into a server-side handle
    Prepare,
    /// Binding parameters to a prepared handle
    Bind,
    /// Executing a bound handle
    Execute,
    /// Releasing a server-side handle
    Release,
    /// One-shot parse-bind-execute with no cached handle
    Direct,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Prepare => write!(f, "prepare"),
            Phase::Bind => write!(f, "bind"),
            Phase::Execute => write!(f, "execute"),
            Phase::Release => write!(f, "release"),
            Phase::Direct => write!(f, "direct"),
        }
    }
}

/// Classification of a backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbErrorKind {
    /// Transport-level failure reaching the database
    Connection,
    /// A previously prepared handle is no longer valid on the server
    StaleStatement,
    /// Parameters could not be bound to the statement
    Bind,
    /// The database rejected the statement or its data
    Database,
}

/// Error reported by a statement backend for a single round trip
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DbError {
    pub kind: DbErrorKind,
    pub message: String,
    /// Server-side error code (SQLSTATE for PostgreSQL), when one was sent
    pub code: Option<String>,
}

impl DbError {
    pub fn new(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::Connection, message)
    }

    pub fn stale(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::StaleStatement, message)
    }

    pub fn bind(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::Bind, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::Database, message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn is_stale(&self) -> bool {
        self.kind == DbErrorKind::StaleStatement
    }
}

/// Main error type for statement execution
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatementError {
    /// Transport-level failure; never retried
    #[error("Connection error during {phase}: {message}")]
    ConnectionError { phase: Phase, message: String },

    /// The database rejected the SQL text; no cache entry was stored
    #[error("Prepare error: {message}")]
    PrepareError {
        message: String,
        code: Option<String>,
    },

    /// A cached handle went stale and no retry was attempted
    #[error("Stale prepared statement: {message}")]
    StaleStatementError { message: String },

    /// Runtime failure while binding or executing
    #[error("Execute error during {phase}: {message}")]
    ExecuteError {
        phase: Phase,
        message: String,
        code: Option<String>,
    },

    /// The caller cancelled the call before it finished
    #[error("Operation cancelled during {phase}")]
    Cancelled { phase: Phase },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type alias for statement execution
pub type Result<T> = std::result::Result<T, StatementError>;

impl StatementError {
    /// Map a backend failure in the given phase into the caller-facing taxonomy.
    ///
    /// Stale handles only reach callers through this path when stale retry is
    /// disabled; the retry path builds its own error.
    pub fn from_db(phase: Phase, err: DbError) -> Self {
        match (err.kind, phase) {
            (DbErrorKind::Connection, _) => StatementError::ConnectionError {
                phase,
                message: err.message,
            },
            (DbErrorKind::StaleStatement, _) => StatementError::StaleStatementError {
                message: err.message,
            },
            (_, Phase::Prepare) => StatementError::PrepareError {
                message: err.message,
                code: err.code,
            },
            (DbErrorKind::Bind, _) => StatementError::ExecuteError {
                phase: Phase::Bind,
                message: err.message,
                code: err.code,
            },
            (DbErrorKind::Database, _) => StatementError::ExecuteError {
                phase,
                message: err.message,
                code: err.code,
            },
        }
    }

    /// The phase that produced this error, if it came from a round trip
    pub fn phase(&self) -> Option<Phase> {
        match self {
            StatementError::ConnectionError { phase, .. }
            | StatementError::ExecuteError { phase, .. }
            | StatementError::Cancelled { phase } => Some(*phase),
            StatementError::PrepareError { .. } => Some(Phase::Prepare),
            StatementError::StaleStatementError { .. } => Some(Phase::Execute),
            StatementError::ConfigError(_) => None,
        }
    }

    /// The database's message, unchanged
    pub fn db_message(&self) -> Option<&str> {
        match self {
            StatementError::ConnectionError { message, .. }
            | StatementError::PrepareError { message, .. }
            | StatementError::StaleStatementError { message }
            | StatementError::ExecuteError { message, .. } => Some(message),
            StatementError::Cancelled { .. } | StatementError::ConfigError(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StatementError::Cancelled { .. })
    }
}
