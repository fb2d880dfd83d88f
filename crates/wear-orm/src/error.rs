//! Error types for the ORM.

use thiserror::Error;

/// ORM-specific errors.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Engine error with the operation that triggered it.
    #[error("{op} error: {source}")]
    Statement {
        /// Operation name, e.g. `insert` or `delete`.
        op: &'static str,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// Validation error, returned before any statement is executed.
    #[error("validation error: {0}")]
    Validation(String),

    /// Column name outside the model's columns.
    #[error("unrecognized column ({0})")]
    InvalidField(String),

    /// The model has no primary key but the operation needs one.
    #[error("missing primary key for table ({0})")]
    MissingPrimaryKey(String),

    /// The primary key field has a type that cannot be a key.
    #[error("unsupported type for primary key {table}.{field}")]
    UnsupportedPrimaryKey {
        /// Table of the model.
        table: String,
        /// Offending field.
        field: String,
    },

    /// A join targets a type the root model does not declare.
    #[error("unknown join relation {0}, fields to be joined should be marked with #[column(join)]")]
    UnknownJoin(String),

    /// NULL read into a column that does not admit it.
    #[error("unexpected NULL in non-nullable column ({0})")]
    UnexpectedNull(String),

    /// A column value could not be decoded into the field type.
    #[error("cannot decode column ({column}): {message}")]
    Decode {
        /// Column or type name.
        column: String,
        /// Reason.
        message: String,
    },

    /// JSON column payload error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading a SQL file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrmError {
    pub(crate) fn statement(op: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Statement { op, source }
    }

    fn db_error(&self) -> Option<&(dyn sqlx::error::DatabaseError + 'static)> {
        match self {
            Self::Database(sqlx::Error::Database(e))
            | Self::Statement {
                source: sqlx::Error::Database(e),
                ..
            } => Some(e.as_ref()),
            _ => None,
        }
    }

    fn matches(&self, code: &str, fragment: &str) -> bool {
        self.db_error().is_some_and(|e| {
            e.code().is_some_and(|c| c == code) || e.message().contains(fragment)
        })
    }

    /// Returns true when a unique or primary key constraint was violated.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        self.db_error().is_some_and(|e| {
            e.is_unique_violation()
                || e.message().contains("Duplicate entry")
                || e.message().contains("UNIQUE constraint failed")
        })
    }

    /// Returns true when a `CREATE TABLE` hit an existing table.
    #[must_use]
    pub fn is_table_exists(&self) -> bool {
        self.matches("42S01", "already exists")
    }

    /// Returns true when a statement referenced a missing table.
    #[must_use]
    pub fn is_table_missing(&self) -> bool {
        self.matches("42S02", "no such table") || self.matches("42S02", "doesn't exist")
    }
}

/// Result type alias for ORM operations.
pub type Result<T> = std::result::Result<T, OrmError>;
