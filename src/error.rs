//! Error taxonomy shared by every layer of the assistant.
//!
//! All library operations return [`FaqResult`]. Bootstrap uses
//! [`FaqError::failure_class`] to decide whether a failure is worth retrying;
//! anything leaving the process goes through [`FaqError::to_public`] first so
//! storage and backend details never reach an external caller.

use rusqlite::ErrorCode;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum FaqError {
    /// An empty or malformed required field.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The embedding backend failed to produce a vector.
    #[error("embedding computation failed: {0}")]
    EmbeddingComputation(String),

    /// A vector does not have the configured dimensionality. Never recoverable.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The generative backend failed.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Generic persistence failure on query/insert/update/delete.
    #[error("database operation failed: {0}")]
    DatabaseOperation(#[from] rusqlite::Error),

    /// No connection could be acquired from the pool in time.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Uniqueness or other constraint breach.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// The backing database file could not be created.
    #[error("database creation failed: {0}")]
    DatabaseCreation(String),

    /// Bootstrap gave up: fatal schema error or retries exhausted.
    #[error("database setup failed: {0}")]
    DatabaseSetup(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("task queue error: {0}")]
    Queue(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type FaqResult<T> = Result<T, FaqError>;

/// How bootstrap should react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Connectivity / locking / I/O: retry after a delay.
    Transient,
    /// SQL or schema problem: retrying cannot help.
    Schema,
    /// Anything else: abort immediately.
    Fatal,
}

impl FaqError {
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Pool(_) | Self::Io(_) => FailureClass::Transient,
            Self::DatabaseOperation(err) => classify_sqlite(err),
            _ => FailureClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.failure_class() == FailureClass::Transient
    }

    /// Sanitized view of this error for external callers.
    pub fn to_public(&self) -> PublicError {
        match self {
            Self::InvalidArgument(msg) => PublicError {
                kind: "invalid_argument",
                message: msg.clone(),
            },
            Self::NotFound(msg) => PublicError {
                kind: "not_found",
                message: msg.clone(),
            },
            Self::Timeout(_) => PublicError {
                kind: "timeout",
                message: "request timed out".into(),
            },
            _ => PublicError {
                kind: "internal",
                message: "internal error".into(),
            },
        }
    }

    /// Map constraint failures onto [`FaqError::IntegrityViolation`], everything
    /// else onto [`FaqError::DatabaseOperation`].
    pub(crate) fn from_write(err: rusqlite::Error, what: impl std::fmt::Display) -> Self {
        if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
            Self::IntegrityViolation(format!("{what}: {err}"))
        } else {
            Self::DatabaseOperation(err)
        }
    }
}

fn classify_sqlite(err: &rusqlite::Error) -> FailureClass {
    match err {
        rusqlite::Error::SqlInputError { .. }
        | rusqlite::Error::InvalidColumnName(_)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::InvalidParameterName(_) => FailureClass::Schema,
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::FileLockingProtocolFailed => FailureClass::Transient,
            // SQLITE_ERROR: syntax errors, missing tables, bad module args
            ErrorCode::Unknown | ErrorCode::SchemaChanged => FailureClass::Schema,
            _ => FailureClass::Fatal,
        },
        _ => FailureClass::Fatal,
    }
}

/// Error shape safe to hand to an external caller.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublicError {
    pub kind: &'static str,
    pub message: String,
}
